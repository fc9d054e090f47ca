/// An authenticated reader. The access token doubles as the bearer token for
/// remote recognition and translation calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Option<Self> {
        let user_id = user_id.into().trim().to_string();
        let access_token = access_token.into().trim().to_string();
        if user_id.is_empty() || access_token.is_empty() {
            return None;
        }
        Some(Self {
            user_id,
            access_token,
        })
    }

    /// Session from `MANGA_TRANSLATOR_USER` / `MANGA_TRANSLATOR_TOKEN`, falling
    /// back to the values from settings.
    pub fn resolve(settings_user: Option<&str>, settings_token: Option<&str>) -> Option<Self> {
        let user = get_env("MANGA_TRANSLATOR_USER").or_else(|| settings_user.map(str::to_string));
        let token =
            get_env("MANGA_TRANSLATOR_TOKEN").or_else(|| settings_token.map(str::to_string));
        Self::new(user?, token?)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_credentials_are_not_a_session() {
        assert!(Session::new("reader", " ").is_none());
        assert!(Session::new("", "token").is_none());
        let session = Session::new(" reader ", "token").unwrap();
        assert_eq!(session.user_id, "reader");
    }

    #[test]
    fn environment_overrides_settings() {
        crate::test_util::with_temp_home(|_| {
            assert_eq!(Session::resolve(Some("reader"), None), None);
            // SAFETY: environment access is serialized by with_temp_home.
            unsafe { std::env::set_var("MANGA_TRANSLATOR_TOKEN", "env-token") };
            let session = Session::resolve(Some("reader"), Some("file-token")).unwrap();
            assert_eq!(session.access_token, "env-token");
            assert_eq!(session.user_id, "reader");
        });
    }

    #[test]
    fn debug_hides_token() {
        let session = Session::new("reader", "secret-token").unwrap();
        assert!(!format!("{:?}", session).contains("secret-token"));
    }
}
