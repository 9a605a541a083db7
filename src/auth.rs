// auth.rs
//
// Shared-secret validation for device connections and controller commands.
// Plain equality, no lockout, no rate limiting; a failed device auth closes
// that connection, an unauthenticated controller command is simply ignored.

use crate::config::AuthSettings;
use crate::models::DeviceClass;

pub struct AuthGate {
    shutters_secret: String,
    irrigation_secret: String,
    robots_secret: String,
    controller_token: String,
}

impl AuthGate {
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            shutters_secret: settings.shutters_secret.clone(),
            irrigation_secret: settings.irrigation_secret.clone(),
            robots_secret: settings.robots_secret.clone(),
            controller_token: settings.controller_token.clone(),
        }
    }

    /// One secret per device class, distinct values, no shared fallback.
    pub fn validate_device_auth(&self, class: DeviceClass, presented: &str) -> bool {
        let expected = match class {
            DeviceClass::Shutters => &self.shutters_secret,
            DeviceClass::Irrigation => &self.irrigation_secret,
            DeviceClass::Robots => &self.robots_secret,
        };
        !expected.is_empty() && presented == expected
    }

    pub fn validate_controller_token(&self, presented: &str) -> bool {
        !self.controller_token.is_empty() && presented == self.controller_token
    }
}
