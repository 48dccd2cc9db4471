pub mod rrcf;

pub use rrcf::{RandomCutForest, RcTree};
