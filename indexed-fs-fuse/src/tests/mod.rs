mod fs;
mod vm;
