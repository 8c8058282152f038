mod assign;
mod cfg;
mod create;
mod dedup;
mod error;
mod gateway;
mod ident;
mod matcher;
mod model;
mod opts;
mod parse;
mod progress_bar;
mod reconcile;
mod route;
mod run;
mod store;
mod sync;
mod text;
mod walker;

pub use cfg::{Config, Direction};
pub use error::Error;
pub use gateway::{JsonGateway, ReminderGateway};
pub use opts::Opts;
pub use run::run;
pub use sync::{perform_sync, SyncEngine, SyncResult};
pub use walker::{DocumentWalker, MarkdownWalker};
