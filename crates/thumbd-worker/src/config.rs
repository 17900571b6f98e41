//! Worker configuration.
//!
//! Loaded from `config.yaml` with `THUMBD__SECTION__KEY` environment
//! overrides, then clamped into typed settings. Out-of-range numbers are
//! pulled into range rather than rejected; missing required database
//! settings are a configuration error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thumbd_media::thumbnail::{DEFAULT_QUALITY, MIN_DIMENSION};
use thumbd_models::WORK_TABLE;
use thumbd_queue::{ClaimPolicy, DatabaseConfig};
use thumbd_storage::{S3Config, DEFAULT_KEY_PREFIX};

use crate::error::{WorkerError, WorkerResult};

/// File name searched for when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

const ENV_PREFIX: &str = "THUMBD";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    daemon: RawDaemon,
    database: RawDatabase,
    aws: RawAws,
    screen_shot: RawScreenShot,
    queue: RawQueue,
    clean: Option<i64>,
    paths: RawPaths,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDaemon {
    processes: Option<i64>,
    wait: Option<i64>,
    collect_cycle_loop: Option<i64>,
    check_every: Option<i64>,
    max_consecutive_failures: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDatabase {
    dbhost: Option<String>,
    dbport: Option<i64>,
    dbname: Option<String>,
    dbuser: Option<String>,
    dbpassword: Option<String>,
    table: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAws {
    region: Option<String>,
    key: Option<String>,
    secret: Option<String>,
    bucket: Option<String>,
    endpoint: Option<String>,
    public_url: Option<String>,
    prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawScreenShot {
    width: Option<i64>,
    height: Option<i64>,
    second: Option<i64>,
    days: Option<i64>,
    quality: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawQueue {
    max_retry: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPaths {
    cache_dir: Option<String>,
    stop_file: Option<String>,
    pid_dir: Option<String>,
    meta_db: Option<String>,
}

fn clamp_or(value: Option<i64>, default: i64, min: i64, max: i64) -> i64 {
    value.map_or(default, |v| v.clamp(min, max))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Pool and loop cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Target number of worker processes
    pub processes: usize,
    /// Sleep between loop iterations
    pub wait: Duration,
    /// Iterations between resource resets
    pub collect_cycle_loop: u64,
    /// Iterations between supervisor checks
    pub check_every: u64,
    /// Consecutive loop failures before the worker exits
    pub max_consecutive_failures: u32,
}

/// Thumbnail geometry and source window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenShotConfig {
    pub width: u32,
    pub height: u32,
    /// Video position the frame is taken from
    pub second: u64,
    /// Recency window in days
    pub days: u32,
    pub quality: u8,
}

/// Local filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
    pub cache_dir: PathBuf,
    pub stop_file: PathBuf,
    pub pid_dir: PathBuf,
    pub meta_db: PathBuf,
}

impl PathsConfig {
    pub fn video_dir(&self) -> PathBuf {
        self.cache_dir.join("video")
    }

    pub fn image_dir(&self) -> PathBuf {
        self.cache_dir.join("image")
    }

    pub fn resize_dir(&self) -> PathBuf {
        self.cache_dir.join("resize")
    }

    /// Directories covered by cache pruning.
    pub fn cache_dirs(&self) -> Vec<PathBuf> {
        vec![self.video_dir(), self.image_dir(), self.resize_dir()]
    }

    pub fn pid_file(&self, pid: u32) -> PathBuf {
        self.pid_dir.join(format!("{}.pid", pid))
    }
}

/// Complete worker configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub daemon: DaemonConfig,
    pub database: DatabaseConfig,
    pub aws: S3Config,
    pub screen_shot: ScreenShotConfig,
    pub max_retry: i32,
    /// Minimum time between cache prunes
    pub clean_period: Duration,
    pub paths: PathsConfig,
    /// File the configuration was read from
    pub source: Option<PathBuf>,
}

impl AppConfig {
    /// Locate and load the configuration file, applying environment overrides.
    pub fn load(explicit: Option<&Path>) -> WorkerResult<Self> {
        let path = locate_config_file(explicit)?;
        let settings = Config::builder()
            .add_source(File::from(path.as_path()).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| WorkerError::config_error(format!("{}: {}", path.display(), e)))?;

        let raw: RawConfig = settings
            .try_deserialize()
            .map_err(|e| WorkerError::config_error(format!("{}: {}", path.display(), e)))?;

        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut config = Self::from_raw(raw, &base)?;
        config.source = Some(path);
        Ok(config)
    }

    /// Parse a YAML document, resolving relative paths against `base`.
    pub fn from_yaml_str(yaml: &str, base: &Path) -> WorkerResult<Self> {
        let raw: RawConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .and_then(Config::try_deserialize::<RawConfig>)
            .map_err(|e| WorkerError::config_error(e.to_string()))?;
        Self::from_raw(raw, base)
    }

    fn from_raw(raw: RawConfig, base: &Path) -> WorkerResult<Self> {
        let daemon = DaemonConfig {
            processes: clamp_or(raw.daemon.processes, 5, 1, 100) as usize,
            wait: Duration::from_secs(clamp_or(raw.daemon.wait, 5, 1, 60) as u64),
            collect_cycle_loop: clamp_or(raw.daemon.collect_cycle_loop, 10, 5, 100) as u64,
            check_every: clamp_or(raw.daemon.check_every, 2, 1, 100) as u64,
            max_consecutive_failures: clamp_or(raw.daemon.max_consecutive_failures, 5, 1, 100)
                as u32,
        };

        let database = DatabaseConfig {
            host: non_empty(raw.database.dbhost).unwrap_or_else(|| "localhost".to_string()),
            port: clamp_or(raw.database.dbport, 5432, 1, i64::from(u16::MAX)) as u16,
            database: non_empty(raw.database.dbname)
                .ok_or_else(|| WorkerError::config_error("database.dbname is required"))?,
            username: non_empty(raw.database.dbuser)
                .ok_or_else(|| WorkerError::config_error("database.dbuser is required"))?,
            password: raw.database.dbpassword.unwrap_or_default(),
            table: non_empty(raw.database.table).unwrap_or_else(|| WORK_TABLE.to_string()),
        };

        let aws = S3Config {
            region: non_empty(raw.aws.region).unwrap_or_default(),
            access_key_id: non_empty(raw.aws.key).unwrap_or_default(),
            secret_access_key: non_empty(raw.aws.secret).unwrap_or_default(),
            bucket: non_empty(raw.aws.bucket).unwrap_or_default(),
            endpoint_url: non_empty(raw.aws.endpoint),
            public_url: non_empty(raw.aws.public_url),
            key_prefix: non_empty(raw.aws.prefix)
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
        };

        let second = match raw.screen_shot.second {
            None => 3,
            Some(s) if s < 0 => 1,
            Some(s) => s as u64,
        };
        let screen_shot = ScreenShotConfig {
            width: clamp_or(raw.screen_shot.width, 640, i64::from(MIN_DIMENSION), 8192) as u32,
            height: clamp_or(raw.screen_shot.height, 360, i64::from(MIN_DIMENSION), 8192) as u32,
            second,
            days: clamp_or(raw.screen_shot.days, 3, 1, 30) as u32,
            quality: clamp_or(raw.screen_shot.quality, i64::from(DEFAULT_QUALITY), 1, 100) as u8,
        };

        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| base.to_path_buf());
        let resolve = |value: Option<String>, default: PathBuf| -> PathBuf {
            match non_empty(value) {
                Some(v) if Path::new(&v).is_absolute() => PathBuf::from(v),
                Some(v) => base.join(v),
                None => default,
            }
        };
        let paths = PathsConfig {
            cache_dir: resolve(raw.paths.cache_dir, base.join("cache")),
            stop_file: resolve(raw.paths.stop_file, base.join(".stop")),
            pid_dir: resolve(raw.paths.pid_dir, std::env::temp_dir().join("thumbd-pid")),
            meta_db: resolve(raw.paths.meta_db, home.join(".sqlite").join("thumbd.db")),
        };

        Ok(Self {
            daemon,
            database,
            aws,
            screen_shot,
            max_retry: clamp_or(raw.queue.max_retry, 3, 1, 100) as i32,
            clean_period: Duration::from_secs(clamp_or(raw.clean, 3, 1, 12) as u64 * 3600),
            paths,
            source: None,
        })
    }

    /// Selection policy for the work table.
    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy::new(self.max_retry, self.screen_shot.days)
    }
}

/// Resolve the configuration file: `explicit`, else the working directory,
/// else next to the executable.
pub fn locate_config_file(explicit: Option<&Path>) -> WorkerResult<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(WorkerError::config_error(format!(
            "Configuration file {} does not exist",
            path.display()
        )));
    }

    let mut candidates = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(CONFIG_FILE_NAME));
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(dir.join(CONFIG_FILE_NAME));
    }

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            WorkerError::config_error(format!("{} not found", CONFIG_FILE_NAME))
        })
}
