mod analyze;
mod clusters;
mod manifest;
mod rank;

pub use analyze::*;
pub use clusters::*;
pub use manifest::*;
pub use rank::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
