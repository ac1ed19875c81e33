mod capture;
mod executor;
mod handle;
mod process;
mod results_file;
mod sink;

pub use executor::ProcessRunner;
pub use handle::{Canceller, Execution, RunHandle};
pub use process::{PlatformHints, ProcessConfig};
pub use results_file::ResultsFile;
pub use sink::{CollectingSink, NullSink, OutputSink};
