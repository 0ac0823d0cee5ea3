pub mod archive;
pub mod eeg;
pub mod images;
pub mod models;
pub mod split;
