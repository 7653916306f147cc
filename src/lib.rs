//! Markview: translation core for a markdown viewer.
//! Content-addressed translation cache, provider adapters and a bounded
//! concurrency batch runner.

pub mod config;
pub mod document;
pub mod events;
pub mod translate;

pub use config::{ConfigError, Settings};
pub use document::Document;
pub use events::{BatchEvent, EventReceiver, EventSender};
pub use translate::{
    BatchReport, BatchTranslator, TranslateError, TranslationCache, TranslationProvider,
    TranslationService,
};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "markview=debug" } else { "markview=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // Ignore an already-installed subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
