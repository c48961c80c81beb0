pub mod archive;
pub mod backup_config;
pub mod compress;
pub mod container;
pub mod coordinator;
pub mod encrypt;
pub mod file_ext;
pub mod finish;
pub mod fragment;
pub mod redacted;
pub mod restore;
pub mod restore_config;
pub mod result_error;
pub mod storage;
pub mod tar;
pub mod transfer;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
