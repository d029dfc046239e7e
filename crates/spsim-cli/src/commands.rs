pub mod export;
pub mod run;
pub mod status;
pub mod worker;
