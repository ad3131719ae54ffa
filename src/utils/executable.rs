use std::path::{Path, PathBuf};

/// 在 PATH 中查找可执行文件；带路径分隔符的参数按文件路径处理
pub fn resolve_executable(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }

    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }

        #[cfg(target_os = "windows")]
        {
            let exe = dir.join(format!("{}.exe", program));
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_not_resolved() {
        assert!(resolve_executable("definitely-not-a-real-telegraf-binary").is_none());
        assert!(resolve_executable("").is_none());
    }

    #[test]
    fn explicit_path_is_checked_directly() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("telegraf");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();

        let resolved = resolve_executable(bin.to_str().unwrap());
        assert_eq!(resolved, Some(bin.clone()));

        let missing = dir.path().join("missing");
        assert!(resolve_executable(missing.to_str().unwrap()).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn shell_is_found_on_path() {
        assert!(resolve_executable("sh").is_some());
    }
}
