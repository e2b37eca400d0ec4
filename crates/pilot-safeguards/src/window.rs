//! Maintenance window gate.
//!
//! Heavy operations only run inside a wall-clock window, e.g.
//! `02:00-06:00`. Windows may wrap midnight. A disabled gate always
//! allows.

use chrono::{Local, Timelike};
use pilot_config::MaintenanceWindowSettings;
use pilot_core::PilotResult;

/// The window gate.
#[derive(Debug, Clone)]
pub struct MaintenanceWindow {
    enabled: bool,
    start_minute: u32,
    end_minute: u32,
    description: String,
}

impl MaintenanceWindow {
    /// Build from settings, parsing the configured window.
    ///
    /// # Errors
    /// Surfaces a configuration error for a malformed window string.
    pub fn from_settings(settings: &MaintenanceWindowSettings) -> PilotResult<Self> {
        let (start_minute, end_minute) = if settings.enabled {
            MaintenanceWindowSettings::parse_window(&settings.window)?
        } else {
            (0, 0)
        };
        Ok(Self {
            enabled: settings.enabled,
            start_minute,
            end_minute,
            description: settings.window.clone(),
        })
    }

    /// A gate that always allows.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            start_minute: 0,
            end_minute: 0,
            description: String::new(),
        }
    }

    /// Human-readable window description for denial reasons.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether the gate is active at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the given minute-of-day is inside the window.
    #[must_use]
    pub fn contains_minute(&self, minute_of_day: u32) -> bool {
        if !self.enabled {
            return true;
        }
        if self.start_minute <= self.end_minute {
            (self.start_minute..self.end_minute).contains(&minute_of_day)
        } else {
            // Wraps midnight: inside when after start or before end.
            minute_of_day >= self.start_minute || minute_of_day < self.end_minute
        }
    }

    /// Whether operations are allowed right now.
    #[must_use]
    pub fn allows_now(&self) -> bool {
        let now = Local::now();
        self.contains_minute(now.hour() * 60 + now.minute())
    }

    /// Whether the current wall clock is inside the window, for status.
    #[must_use]
    pub fn in_window(&self) -> Option<bool> {
        self.enabled.then(|| self.allows_now())
    }
}
