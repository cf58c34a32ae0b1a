//! Fumigation work orders and the lot status lattice
//!
//! A lot moves `Available -> Assigned -> Started -> Completed`, one step at a
//! time. The table is a total function from the current status to its single
//! successor, so `can_transition` is a pure predicate that the UI can use to
//! pre-filter and that the services re-check under row locks.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use std::str::FromStr;

use super::lot::Lot;
use crate::error::{TransitionError, ValidationError};

/// Fumigation status of a lot, stored as the codes `"1"`..`"4"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FumigationStatus {
    Available,
    Assigned,
    Started,
    Completed,
}

impl FumigationStatus {
    pub const ALL: [FumigationStatus; 4] = [
        FumigationStatus::Available,
        FumigationStatus::Assigned,
        FumigationStatus::Started,
        FumigationStatus::Completed,
    ];

    /// Storage code
    pub fn code(&self) -> &'static str {
        match self {
            FumigationStatus::Available => "1",
            FumigationStatus::Assigned => "2",
            FumigationStatus::Started => "3",
            FumigationStatus::Completed => "4",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(FumigationStatus::Available),
            "2" => Some(FumigationStatus::Assigned),
            "3" => Some(FumigationStatus::Started),
            "4" => Some(FumigationStatus::Completed),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            FumigationStatus::Available => "AVAILABLE",
            FumigationStatus::Assigned => "ASSIGNED",
            FumigationStatus::Started => "STARTED",
            FumigationStatus::Completed => "COMPLETED",
        }
    }

    /// Operator-facing label
    pub fn label(&self) -> &'static str {
        match self {
            FumigationStatus::Available => "Disponible",
            FumigationStatus::Assigned => "Asignada",
            FumigationStatus::Started => "En fumigación",
            FumigationStatus::Completed => "Finalizada",
        }
    }

    /// The only status this one may move to; `None` for the terminal status
    pub fn next(&self) -> Option<Self> {
        match self {
            FumigationStatus::Available => Some(FumigationStatus::Assigned),
            FumigationStatus::Assigned => Some(FumigationStatus::Started),
            FumigationStatus::Started => Some(FumigationStatus::Completed),
            FumigationStatus::Completed => None,
        }
    }

    pub fn can_transition_to(&self, target: FumigationStatus) -> bool {
        self.next() == Some(target)
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl std::fmt::Display for FumigationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code(), self.label())
    }
}

/// Whether `lot` may move to `target` right now
pub fn can_transition(lot: &Lot, target: FumigationStatus) -> bool {
    lot.fumigation_status.can_transition_to(target)
}

/// Move `lot` to `target`, or explain why the lattice forbids it
pub fn transition_fumigation_status(
    lot: &mut Lot,
    target: FumigationStatus,
) -> Result<(), TransitionError> {
    let current = lot.fumigation_status;
    if !current.can_transition_to(target) {
        let allowed = current
            .next()
            .map(|next| next.code().to_string())
            .unwrap_or_else(|| "none (terminal status)".to_string());
        let allowed_es = current
            .next()
            .map(|next| next.code().to_string())
            .unwrap_or_else(|| "ninguno (estado terminal)".to_string());
        return Err(TransitionError::new(
            format!(
                "Invalid transition for lot {}: {} -> {}. Allowed statuses: {}.",
                lot.display_number(),
                current.code(),
                target.code(),
                allowed
            ),
            format!(
                "Transición inválida para lote {}: {} -> {}. Estados permitidos: {}.",
                lot.display_number(),
                current.code(),
                target.code(),
                allowed_es
            ),
        ));
    }
    lot.fumigation_status = target;
    Ok(())
}

/// A fumigation work order over a fixed set of lots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fumigation {
    pub id: i64,
    pub work_order: String,
    pub real_start_date: Option<NaiveDate>,
    pub real_start_time: Option<NaiveTime>,
    pub real_end_date: Option<NaiveDate>,
    pub real_end_time: Option<NaiveTime>,
    pub fumigation_sign_path: Option<String>,
    pub work_order_path: Option<String>,
    pub certificate_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Fumigation {
    /// Terminal once the real end date is recorded
    pub fn is_completed(&self) -> bool {
        self.real_end_date.is_some()
    }

    pub fn mutation_token(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// Progress of a fumigation, derived from the record and its member lots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FumigationPhase {
    Assigned,
    Started,
    Completed,
}

/// Accepts the English names and the Spanish filter values, case-insensitive
impl FromStr for FumigationPhase {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "assigned" | "asignada" => Ok(FumigationPhase::Assigned),
            "started" | "en_fumigacion" => Ok(FumigationPhase::Started),
            "completed" | "finalizada" => Ok(FumigationPhase::Completed),
            _ => Err(ValidationError::on_field(
                "phase",
                format!("Unknown fumigation phase: {}.", s),
                format!("Estado de fumigación desconocido: {}.", s),
            )),
        }
    }
}

/// A fumigation with its member lots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FumigationWithLots {
    #[serde(flatten)]
    pub fumigation: Fumigation,
    pub lots: Vec<Lot>,
}

impl FumigationWithLots {
    /// `None` when the membership shows no progress at all, which only happens
    /// for data written outside the state machine
    pub fn phase(&self) -> Option<FumigationPhase> {
        if self.fumigation.is_completed() {
            return Some(FumigationPhase::Completed);
        }
        let has = |status| self.lots.iter().any(|lot| lot.fumigation_status == status);
        if has(FumigationStatus::Started) {
            Some(FumigationPhase::Started)
        } else if has(FumigationStatus::Assigned) {
            Some(FumigationPhase::Assigned)
        } else {
            None
        }
    }
}

/// Filter for listing fumigations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FumigationFilter {
    pub phase: Option<FumigationPhase>,
    /// Case-insensitive substring of the work order
    pub work_order: Option<String>,
}

/// Documents recorded when a fumigation starts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartDocuments {
    pub fumigation_sign_path: Option<String>,
    pub work_order_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn lot(status: FumigationStatus) -> Lot {
        Lot {
            id: 1,
            reception_id: 1,
            variety_id: 1,
            packaging_id: 1,
            lot_number: 7,
            packagings_quantity: 10,
            net_weight: None,
            has_qc: false,
            fumigation_status: status,
            on_warehouse: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn test_status_codes_round_trip() {
        for status in FumigationStatus::ALL {
            assert_eq!(FumigationStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(FumigationStatus::from_code("5"), None);
        assert_eq!(FumigationStatus::from_code(""), None);
    }

    #[test]
    fn test_each_status_has_single_successor() {
        assert_eq!(FumigationStatus::Available.next(), Some(FumigationStatus::Assigned));
        assert_eq!(FumigationStatus::Assigned.next(), Some(FumigationStatus::Started));
        assert_eq!(FumigationStatus::Started.next(), Some(FumigationStatus::Completed));
        assert!(FumigationStatus::Completed.is_terminal());
    }

    #[test]
    fn test_successor_is_strictly_greater() {
        for status in FumigationStatus::ALL {
            if let Some(next) = status.next() {
                assert!(next > status);
            }
        }
    }

    #[test]
    fn test_no_skips_or_regressions() {
        for from in FumigationStatus::ALL {
            for to in FumigationStatus::ALL {
                let allowed = from.can_transition_to(to);
                assert_eq!(allowed, from.next() == Some(to), "{from} -> {to}");
            }
        }
        assert!(!FumigationStatus::Assigned.can_transition_to(FumigationStatus::Completed));
        assert!(!FumigationStatus::Started.can_transition_to(FumigationStatus::Assigned));
        assert!(!FumigationStatus::Available.can_transition_to(FumigationStatus::Available));
    }

    #[test]
    fn test_transition_updates_lot() {
        let mut l = lot(FumigationStatus::Available);
        assert!(can_transition(&l, FumigationStatus::Assigned));
        transition_fumigation_status(&mut l, FumigationStatus::Assigned).unwrap();
        assert_eq!(l.fumigation_status, FumigationStatus::Assigned);
    }

    #[test]
    fn test_invalid_transition_names_lot_and_leaves_it_untouched() {
        let mut l = lot(FumigationStatus::Assigned);
        let err = transition_fumigation_status(&mut l, FumigationStatus::Completed).unwrap_err();
        assert!(err.message.contains("lot 007"));
        assert!(err.message.contains("2 -> 4"));
        assert!(err.message_es.contains("lote 007"));
        assert_eq!(l.fumigation_status, FumigationStatus::Assigned);
    }

    #[test]
    fn test_terminal_transition_message() {
        let mut l = lot(FumigationStatus::Completed);
        let err = transition_fumigation_status(&mut l, FumigationStatus::Completed).unwrap_err();
        assert!(err.message_es.contains("estado terminal"));
    }

    #[test]
    fn test_status_serializes_as_key() {
        let json = serde_json::to_string(&FumigationStatus::Started).unwrap();
        assert_eq!(json, "\"STARTED\"");
    }

    #[test]
    fn test_phase_derivation() {
        let fumigation = Fumigation {
            id: 1,
            work_order: "OT-1".into(),
            real_start_date: None,
            real_start_time: None,
            real_end_date: None,
            real_end_time: None,
            fumigation_sign_path: None,
            work_order_path: None,
            certificate_path: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        let mut view = FumigationWithLots {
            fumigation,
            lots: vec![lot(FumigationStatus::Assigned)],
        };
        assert_eq!(view.phase(), Some(FumigationPhase::Assigned));
        view.lots.push(lot(FumigationStatus::Started));
        assert_eq!(view.phase(), Some(FumigationPhase::Started));
        view.fumigation.real_end_date = Some(Utc::now().date_naive());
        assert_eq!(view.phase(), Some(FumigationPhase::Completed));
    }

    #[test]
    fn test_phase_parses_english_and_spanish_names() {
        assert_eq!("Assigned".parse::<FumigationPhase>(), Ok(FumigationPhase::Assigned));
        assert_eq!(" en_fumigacion ".parse::<FumigationPhase>(), Ok(FumigationPhase::Started));
        assert_eq!("finalizada".parse::<FumigationPhase>(), Ok(FumigationPhase::Completed));

        let err = "paused".parse::<FumigationPhase>().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("phase"));
        assert_eq!(err.message_es, "Estado de fumigación desconocido: paused.");
    }
}
