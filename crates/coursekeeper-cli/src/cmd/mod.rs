pub mod clean_history;
pub mod completions;
pub mod init;
pub mod rescore;
