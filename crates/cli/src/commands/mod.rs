pub mod algorithms;
pub mod run;
