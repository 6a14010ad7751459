pub mod catalog;
pub mod decay;
pub mod feed;
pub mod interests;
pub mod maintenance;
pub mod ranking;
pub mod recommendations;
