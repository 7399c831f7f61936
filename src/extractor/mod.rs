//! The extractor boundary: argument construction and subprocess execution
//! (C7), retry/backoff (C8), and provider selection (C9).

pub mod dispatcher;
pub mod invoker;
pub mod probe;
pub mod retry;

pub use dispatcher::ProviderDispatcher;
pub use invoker::{DownloadOutcome, Invoker, ProcessInvoker};
pub use probe::ExtractorLivenessProbe;
