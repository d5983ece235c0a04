//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Limit values held for the active control target."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::TimeDelta;
use r_cbx_common::UseCase;
use r_cbx_msg::{MessageType, WireLimit};

/// A power limit as written to or read from a controllable system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadLimit {
    pub is_active: bool,
    pub value: f64,
    pub duration: TimeDelta,
}

impl Default for LoadLimit {
    fn default() -> Self {
        Self {
            is_active: false,
            value: 0.0,
            duration: TimeDelta::zero(),
        }
    }
}

impl LoadLimit {
    pub fn new(is_active: bool, value: f64, duration: TimeDelta) -> Self {
        Self {
            is_active,
            value,
            duration,
        }
    }

    pub fn from_wire(limit: &WireLimit) -> Self {
        Self::new(limit.is_active, limit.value, limit.duration())
    }

    pub fn to_wire(&self) -> WireLimit {
        WireLimit::new(self.is_active, self.value, self.duration)
    }
}

/// Value a controllable system falls back to when the controller goes silent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailsafeLimit {
    pub value: f64,
    pub duration: TimeDelta,
}

impl Default for FailsafeLimit {
    fn default() -> Self {
        Self {
            value: 0.0,
            duration: TimeDelta::zero(),
        }
    }
}

/// Direction of a load-control limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Consumption,
    Production,
}

impl Direction {
    pub fn use_case(self) -> UseCase {
        match self {
            Direction::Consumption => UseCase::Lpc,
            Direction::Production => UseCase::Lpp,
        }
    }

    pub fn from_use_case(use_case: UseCase) -> Option<Self> {
        match use_case {
            UseCase::Lpc => Some(Direction::Consumption),
            UseCase::Lpp => Some(Direction::Production),
            UseCase::Mgcp | UseCase::Mpc => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::Consumption => "consumption",
            Direction::Production => "production",
        }
    }

    pub fn limit_message(self) -> MessageType {
        match self {
            Direction::Consumption => MessageType::GetConsumptionLimit,
            Direction::Production => MessageType::GetProductionLimit,
        }
    }

    pub fn failsafe_value_message(self) -> MessageType {
        match self {
            Direction::Consumption => MessageType::GetConsumptionFailsafeValue,
            Direction::Production => MessageType::GetProductionFailsafeValue,
        }
    }

    pub fn failsafe_duration_message(self) -> MessageType {
        match self {
            Direction::Consumption => MessageType::GetConsumptionFailsafeDuration,
            Direction::Production => MessageType::GetProductionFailsafeDuration,
        }
    }

    pub fn nominal_max_message(self) -> MessageType {
        match self {
            Direction::Consumption => MessageType::GetConsumptionNominalMax,
            Direction::Production => MessageType::GetProductionNominalMax,
        }
    }
}

/// Limit values the hub holds for the active target. Zero-initialised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitState {
    pub consumption_limit: LoadLimit,
    pub production_limit: LoadLimit,
    pub consumption_failsafe: FailsafeLimit,
    pub production_failsafe: FailsafeLimit,
    pub consumption_nominal_max: f64,
    pub production_nominal_max: f64,
}

impl LimitState {
    pub fn limit(&self, direction: Direction) -> LoadLimit {
        match direction {
            Direction::Consumption => self.consumption_limit,
            Direction::Production => self.production_limit,
        }
    }

    pub fn set_limit(&mut self, direction: Direction, limit: LoadLimit) {
        match direction {
            Direction::Consumption => self.consumption_limit = limit,
            Direction::Production => self.production_limit = limit,
        }
    }

    pub fn failsafe(&self, direction: Direction) -> FailsafeLimit {
        match direction {
            Direction::Consumption => self.consumption_failsafe,
            Direction::Production => self.production_failsafe,
        }
    }

    pub fn failsafe_mut(&mut self, direction: Direction) -> &mut FailsafeLimit {
        match direction {
            Direction::Consumption => &mut self.consumption_failsafe,
            Direction::Production => &mut self.production_failsafe,
        }
    }

    pub fn nominal_max(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Consumption => self.consumption_nominal_max,
            Direction::Production => self.production_nominal_max,
        }
    }

    pub fn set_nominal_max(&mut self, direction: Direction, value: f64) {
        match direction {
            Direction::Consumption => self.consumption_nominal_max = value,
            Direction::Production => self.production_nominal_max = value,
        }
    }
}
