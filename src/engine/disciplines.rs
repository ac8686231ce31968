use tracing::info;

use crate::limits::MAX_DISCIPLINES;
use crate::model::*;

use super::conflict::validate_labels;
use super::{Engine, EngineError};

impl Engine {
    /// Let `teacher` book rooms for `subject` from now on.
    /// Assignment changes hold the log gate exclusively, so no schedule
    /// is in flight while one commits.
    pub async fn assign_subject(&self, teacher: &str, subject: &str) -> Result<Discipline, EngineError> {
        validate_labels(teacher, subject)?;
        self.require_professor(teacher)?;

        let _gate = self.log_gate.write().await;
        if self.store.has_discipline(teacher, subject) {
            return Err(EngineError::DisciplineAlreadyAssigned {
                teacher: teacher.to_string(),
                subject: subject.to_string(),
            });
        }
        if self.store.discipline_count() >= MAX_DISCIPLINES {
            return Err(EngineError::LimitExceeded("too many subject assignments"));
        }

        let discipline = Discipline {
            teacher: teacher.to_string(),
            subject: subject.to_string(),
        };
        let event = Event::SubjectAssigned {
            discipline: discipline.clone(),
        };
        self.wal_append(&event).await?;
        self.store.apply_global(&event);
        info!("subject {subject:?} assigned to {teacher}");
        Ok(discipline)
    }

    /// Withdraw a runtime assignment. Refused while any occupation still
    /// books a room for this teacher and subject. Subjects granted by the
    /// directory itself cannot be withdrawn here.
    pub async fn unassign_subject(&self, teacher: &str, subject: &str) -> Result<(), EngineError> {
        let _gate = self.log_gate.write().await;
        if !self.store.has_discipline(teacher, subject) {
            return Err(EngineError::DisciplineNotFound {
                teacher: teacher.to_string(),
                subject: subject.to_string(),
            });
        }

        let mut in_use = 0;
        for rs in self.store.rooms() {
            let guard = rs.read().await;
            in_use += guard
                .occupations
                .iter()
                .filter(|o| o.teacher == teacher && o.subject == subject)
                .count();
        }
        if in_use > 0 {
            return Err(EngineError::DisciplineInUse {
                teacher: teacher.to_string(),
                subject: subject.to_string(),
                occupations: in_use,
            });
        }

        let event = Event::SubjectUnassigned {
            discipline: Discipline {
                teacher: teacher.to_string(),
                subject: subject.to_string(),
            },
        };
        self.wal_append(&event).await?;
        self.store.apply_global(&event);
        info!("subject {subject:?} unassigned from {teacher}");
        Ok(())
    }

    /// Runtime assignments, all or one teacher's, sorted by teacher then subject.
    pub fn list_disciplines(&self, teacher: Option<&str>) -> Vec<Discipline> {
        self.store.disciplines(teacher)
    }
}
