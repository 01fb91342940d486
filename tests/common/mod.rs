pub(crate) mod chains;

pub(crate) mod logging;

pub(crate) mod mem_db;
