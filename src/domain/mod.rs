mod history;
mod money;
mod wallet;

pub use history::*;
pub use money::*;
pub use wallet::*;
