// Test modules for dmsync
// Each module covers the corresponding source module

mod helpers;
mod lib_tests;
mod messaging_tests;
mod settings_tests;
mod storage_tests;
