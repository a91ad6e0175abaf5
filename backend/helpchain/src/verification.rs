//! One-time delivery verification codes.
//!
//! The owning NGO issues a 6-digit code and hands it to the beneficiary, who
//! gives it to the volunteer at the door. A code expires after the configured
//! lifetime. Each submission claims one attempt before it is compared, and
//! the code locks once the configured number is used up; issuing a new one
//! resets both.

use std::fmt;
use std::time::Duration;

use rand::Rng;

pub fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeRejection {
    Missing,
    Expired,
    Locked,
    Mismatch,
}

impl fmt::Display for CodeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Missing => "A verification code is required for this delivery",
            Self::Expired => "Verification code has expired",
            Self::Locked => "Too many wrong verification codes; ask for a new one",
            Self::Mismatch => "Verification code does not match",
        })
    }
}

/// An outstanding code, read back when an attempt against it is claimed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct IssuedCode {
    pub code: String,
    pub issued_at: i64,
}

/// Limits applied when checking a submitted code.
#[derive(Debug, Clone, Copy)]
pub struct CodePolicy {
    pub ttl: Duration,
    pub max_attempts: u32,
}

impl CodePolicy {
    pub fn expires_at(&self, issued_at: i64) -> i64 {
        issued_at.saturating_add(i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX))
    }

    /// Check `submitted` against a code whose attempt has already been
    /// claimed. `None` means no attempt was left.
    pub fn check(
        &self,
        issued: Option<&IssuedCode>,
        submitted: &str,
        now: i64,
    ) -> Result<(), CodeRejection> {
        let issued = issued.ok_or(CodeRejection::Locked)?;
        if now > self.expires_at(issued.issued_at) {
            return Err(CodeRejection::Expired);
        }
        if submitted == issued.code {
            Ok(())
        } else {
            Err(CodeRejection::Mismatch)
        }
    }
}

/// The trimmed code a volunteer submitted, if any.
pub fn submitted(otp: Option<&str>) -> Result<&str, CodeRejection> {
    otp.map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or(CodeRejection::Missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued(code: &str, issued_at: i64) -> IssuedCode {
        IssuedCode {
            code: code.to_string(),
            issued_at,
        }
    }

    const POLICY: CodePolicy = CodePolicy {
        ttl: Duration::from_secs(900),
        max_attempts: 3,
    };

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn blank_submission_is_missing() {
        assert_eq!(submitted(None), Err(CodeRejection::Missing));
        assert_eq!(submitted(Some("   ")), Err(CodeRejection::Missing));
        assert_eq!(submitted(Some(" 123456 ")), Ok("123456"));
    }

    #[test]
    fn matching_code_within_ttl_passes() {
        let code = issued("123456", 1_000);
        assert_eq!(POLICY.check(Some(&code), "123456", 1_900), Ok(()));
    }

    #[test]
    fn rejections() {
        let code = issued("123456", 1_000);
        assert_eq!(
            POLICY.check(Some(&code), "654321", 1_001),
            Err(CodeRejection::Mismatch)
        );
        assert_eq!(
            POLICY.check(Some(&code), "123456", 1_901),
            Err(CodeRejection::Expired)
        );
        assert_eq!(
            POLICY.check(None, "123456", 1_001),
            Err(CodeRejection::Locked)
        );
    }
}
