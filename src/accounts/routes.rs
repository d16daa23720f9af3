//! Paths of the named routes that handlers redirect to.

pub const HOME: &str = "/";
pub const SIGNUP: &str = "/signup";
pub const ACTIVATION_SENT: &str = "/activation/sent";
pub const ACTIVATE: &str = "/activate/:uidb64/:token";
pub const PROFILE: &str = "/profile";
pub const PROFILE_UPDATED: &str = "/profile/updated";
pub const LOGIN: &str = "/login";
pub const LOGOUT: &str = "/logout";

/// Only same-site paths are followed after login. Browsers drop tabs and
/// newlines from URLs, so any whitespace or control character disqualifies.
pub fn is_safe_next(next: &str) -> bool {
    next.starts_with('/')
        && !next.starts_with("//")
        && !next.contains('\\')
        && !next.chars().any(|c| c.is_control() || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_next_rejects_offsite_targets() {
        assert!(is_safe_next("/profile"));
        assert!(!is_safe_next("//evil.example"));
        assert!(!is_safe_next("https://evil.example"));
        assert!(!is_safe_next("/\\evil.example"));
        assert!(!is_safe_next(""));
        assert!(!is_safe_next("/\t/evil.example"));
        assert!(!is_safe_next("/profile\nx"));
        assert!(!is_safe_next("/profile\r\nSet-Cookie: a=b"));
        assert!(!is_safe_next("/ /evil.example"));
        assert!(!is_safe_next("/\u{7f}"));
        assert!(is_safe_next("/profile?tab=names&x=%20"));
    }
}
