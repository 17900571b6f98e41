//! Tracing setup and per-item logging.

use tracing::{error, info, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `LOG_FORMAT=json` selects JSON lines, otherwise a colored human format.
/// `RUST_LOG` directives are honored on top of the `thumbd=info` default.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["thumbd=info", "sqlx=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if use_json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };
    // A subscriber installed by an embedding program wins
    let _ = result;
}

/// Pipeline stage of a claimed row, used as the `stage` log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Frame,
    Thumbnail,
    Upload,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Frame => "frame",
            Stage::Thumbnail => "thumbnail",
            Stage::Upload => "upload",
        }
    }
}

/// Console lines for one claimed work row, all tagged with its id.
#[derive(Debug, Clone, Copy)]
pub struct ItemLogger {
    item_id: i64,
}

impl ItemLogger {
    pub fn new(item_id: i64) -> Self {
        Self { item_id }
    }

    pub fn item_id(&self) -> i64 {
        self.item_id
    }

    pub fn claimed(&self, url: &str) {
        info!(item_id = self.item_id, url, "Claimed row");
    }

    pub fn stage(&self, stage: Stage, detail: &str) {
        info!(item_id = self.item_id, stage = stage.as_str(), "{}", detail);
    }

    pub fn succeeded(&self, cover_image: &str) {
        info!(item_id = self.item_id, cover_image, "Thumbnail stored");
    }

    pub fn failed(&self, status: &str, reason: &str) {
        error!(item_id = self.item_id, status, "Row failed: {}", reason);
    }

    /// Span wrapping the whole run of this row.
    pub fn span(&self) -> Span {
        tracing::info_span!("item", item_id = self.item_id)
    }
}
