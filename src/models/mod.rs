pub use loan::*;
pub use market::*;
pub use position::*;
pub use requests::*;

pub mod loan;
pub mod market;
pub mod position;
pub mod requests;
