use chrono::Utc;

use crate::data::Data;
use crate::errors::{LicenseError, Result};

impl Data {
    /// Determine whether this license is valid for use right now.
    ///
    /// A license is valid when its metadata is present, the current time falls
    /// within the activation window and a payload is defined. The error
    /// carries the consumer-facing diagnostic for whichever check failed
    /// first.
    pub fn validate(&self) -> Result<()> {
        let meta = self.meta.as_ref().ok_or(LicenseError::MetadataMissing)?;

        let now = Utc::now();
        if now < meta.activates {
            return Err(LicenseError::NotYetActive);
        }

        if now > meta.expires {
            return Err(LicenseError::Expired);
        }

        if self.payload.is_none() {
            return Err(LicenseError::PayloadMissing);
        }

        Ok(())
    }

    /// Convenience wrapper around [`Data::validate`].
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Metadata;
    use chrono::Duration;
    use serde_json::Map;

    #[test]
    fn test_empty_license_is_invalid() {
        let license = Data::default();

        let err = license.validate().unwrap_err();
        assert_eq!(err.to_string(), "license metadata not defined");
        assert!(!license.is_valid());
    }

    #[test]
    fn test_delayed_license_is_invalid() {
        let license = Data {
            meta: Some(Metadata {
                id: "0".to_string(),
                activates: Utc::now() + Duration::seconds(5),
                expires: Utc::now() + Duration::seconds(10),
                pack: None,
            }),
            payload: Some(Map::new()),
        };

        let err = license.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "license has not yet activated due to time constraint"
        );
    }

    #[test]
    fn test_expired_license_is_invalid() {
        let license = Data {
            meta: Some(Metadata {
                id: "0".to_string(),
                activates: Utc::now() - Duration::seconds(15),
                expires: Utc::now() - Duration::seconds(5),
                pack: None,
            }),
            payload: Some(Map::new()),
        };

        let err = license.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "license has expired due to time constraint"
        );
    }

    #[test]
    fn test_license_without_payload_is_invalid() {
        let license = Data {
            meta: Some(Metadata {
                id: "0".to_string(),
                activates: Utc::now() - Duration::seconds(5),
                expires: Utc::now() + Duration::seconds(5),
                pack: None,
            }),
            payload: None,
        };

        let err = license.validate().unwrap_err();
        assert_eq!(err.to_string(), "license payload was not defined");
    }

    #[test]
    fn test_current_license_is_valid() {
        let license = Data {
            meta: Some(Metadata {
                id: "0".to_string(),
                activates: Utc::now() - Duration::seconds(5),
                expires: Utc::now() + Duration::seconds(5),
                pack: None,
            }),
            payload: Some(Map::new()),
        };

        license.validate().unwrap();
        assert!(license.is_valid());
    }
}
