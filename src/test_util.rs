use std::path::Path;

/// Runs `func` with `HOME` pointing at a fresh directory and the base-dir
/// override unset. Serialized, since the environment is process-wide.
pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&Path) -> R,
{
    static HOME_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let _guard = HOME_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let saved = ["HOME", "MANGA_TRANSLATOR_DIR", "MANGA_TRANSLATOR_USER", "MANGA_TRANSLATOR_TOKEN"]
        .map(|key| (key, std::env::var(key).ok()));
    // SAFETY: guarded by HOME_MUTEX; tests touching the environment go through here.
    unsafe {
        std::env::set_var("HOME", dir.path());
        for (key, _) in saved.iter().skip(1) {
            std::env::remove_var(key);
        }
    }
    let result = func(dir.path());
    for (key, value) in saved {
        // SAFETY: as above.
        unsafe {
            match value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }
    result
}
