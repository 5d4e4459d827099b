pub mod indicator_archive;
pub mod prod_db;
