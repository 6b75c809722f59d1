use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use super::{RunEvent, RunEventKind};

/// Almacenamiento de eventos append-only.
pub trait EventStore {
    /// Agrega un evento a partir de su kind y devuelve el evento completo (con seq y ts).
    fn append_kind(&mut self, run_id: Uuid, kind: RunEventKind) -> RunEvent;
    /// Lista eventos de un run (orden ascendente por seq).
    fn list(&self, run_id: Uuid) -> Vec<RunEvent>;
    /// Runs registrados, en orden de inicio.
    fn runs(&self) -> Vec<Uuid>;
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: HashMap<Uuid, Vec<RunEvent>>,
    order: Vec<Uuid>,
}

impl EventStore for InMemoryEventStore {
    fn append_kind(&mut self, run_id: Uuid, kind: RunEventKind) -> RunEvent {
        let events = self.inner.entry(run_id).or_default();
        if events.is_empty() {
            self.order.push(run_id);
        }
        let ev = RunEvent { seq: events.len() as u64,
                            run_id,
                            kind,
                            ts: Utc::now() };
        events.push(ev.clone());
        ev
    }

    fn list(&self, run_id: Uuid) -> Vec<RunEvent> {
        self.inner.get(&run_id).cloned().unwrap_or_default()
    }

    fn runs(&self) -> Vec<Uuid> {
        self.order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_per_run_and_runs_keep_order() {
        let mut store = InMemoryEventStore::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.append_kind(a, RunEventKind::RunCancelled { batches: 0 });
        let ev = store.append_kind(b, RunEventKind::RunCompleted { batches: 1, items: 4 });
        store.append_kind(a, RunEventKind::RunCompleted { batches: 2, items: 8 });
        assert_eq!(ev.seq, 0);
        assert_eq!(store.list(a).len(), 2);
        assert_eq!(store.list(a)[1].seq, 1);
        assert_eq!(store.runs(), vec![a, b]);
    }
}
