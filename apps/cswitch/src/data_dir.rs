use std::path::PathBuf;

pub(crate) fn resolve_data_dir(cli_value: &str) -> PathBuf {
    if !cli_value.trim().is_empty() {
        return PathBuf::from(cli_value);
    }
    if let Ok(home) = std::env::var("HOME")
        && !home.trim().is_empty()
    {
        return PathBuf::from(home).join(".code-switch");
    }
    PathBuf::from("./data")
}
