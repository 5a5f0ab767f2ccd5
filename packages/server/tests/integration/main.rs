mod common;
mod files;
mod video;
