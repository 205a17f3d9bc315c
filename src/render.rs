pub mod backend;
pub mod image_dir;
