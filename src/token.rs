use chrono::{DateTime, Duration, Utc};
use rand::Rng;

const KEY_BYTES: usize = 64;

pub fn make_recipient_key() -> String {
    base64::encode_config(
        rand::thread_rng()
            .sample_iter(rand::distributions::Standard)
            .take(KEY_BYTES)
            .collect::<Vec<u8>>(),
        base64::URL_SAFE_NO_PAD,
    )
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn generate(now: DateTime<Utc>, validity: Duration) -> Self {
        Self {
            value: make_recipient_key(),
            issued_at: now,
            expires_at: now + validity,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn matches(&self, presented: &str) -> bool {
        // digests, so a shared prefix doesn't shorten the comparison
        crate::hash_slice(self.value.as_bytes()) == crate::hash_slice(presented.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_url_safe_and_unique() {
        let a = make_recipient_key();
        let b = make_recipient_key();
        assert_ne!(a, b);
        assert_eq!(a.len(), 86);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn expiry_is_exclusive_of_the_boundary() {
        let now = Utc::now();
        let token = AccessToken::generate(now, Duration::hours(1));
        assert!(!token.is_expired(now + Duration::hours(1)));
        assert!(token.is_expired(now + Duration::hours(1) + Duration::seconds(1)));
    }

    #[test]
    fn matches_only_exact_value() {
        let token = AccessToken::generate(Utc::now(), Duration::hours(1));
        assert!(token.matches(&token.value.clone()));
        assert!(!token.matches(&token.value[..10]));
        assert!(!token.matches(""));
    }
}
