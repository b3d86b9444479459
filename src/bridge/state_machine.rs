use crate::command::Command;
use crate::consensus::StateMachine;
use crate::protocol::Frame;
use crate::storage::KvsEngine;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Applies committed entries to the storage engine.
///
/// An entry is the wire encoding of a Set or Delete request; the response
/// frame it produces is handed back to whoever proposed it.
pub struct KvStateMachine {
    db: Arc<dyn KvsEngine>,
}

impl KvStateMachine {
    pub fn new(db: Arc<dyn KvsEngine>) -> Self {
        Self { db }
    }
}

impl StateMachine for KvStateMachine {
    type Response = Frame;

    fn apply(&self, index: u64, entry: &[u8]) -> Frame {
        let command = match Frame::decode(entry)
            .map_err(crate::Error::from)
            .and_then(Command::from_frame)
        {
            Ok(command) => command,
            Err(e) => {
                warn!(index, error = %e, "Skipping undecodable log entry");
                return Frame::Error(e.to_string());
            }
        };

        debug!(index, command = command.name(), "apply");
        match command {
            Command::Set(cmd) => cmd.apply(self.db.as_ref()),
            Command::Delete(cmd) => cmd.apply(self.db.as_ref()),
            other => {
                warn!(index, command = other.name(), "Command cannot be replicated");
                Frame::Error(format!("{} cannot be replicated", other.name()))
            }
        }
    }

    /// A JSON object of every live pair.
    fn snapshot(&self) -> Result<Vec<u8>> {
        let pairs: BTreeMap<String, String> = self.db.scan()?.into_iter().collect();
        Ok(serde_json::to_vec(&pairs)?)
    }

    /// Only keys that differ from the snapshot are written.
    fn restore(&self, data: &[u8]) -> Result<()> {
        let mut target: BTreeMap<String, String> = serde_json::from_slice(data)?;
        let mut removed = 0usize;
        for (key, value) in self.db.scan()? {
            match target.get(&key) {
                Some(wanted) if *wanted == value => {
                    target.remove(&key);
                }
                Some(_) => {}
                None => {
                    self.db.remove(&key)?;
                    removed += 1;
                }
            }
        }
        let written = target.len();
        for (key, value) in target {
            self.db.set(key, value)?;
        }
        info!(written, removed, "Restored state from snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Delete, Get, Set};
    use crate::storage::MemoryEngine;

    fn entry(command: Command) -> Vec<u8> {
        command.into_frame().encode().to_vec()
    }

    #[test]
    fn test_apply_writes() {
        let db = Arc::new(MemoryEngine::new());
        let sm = KvStateMachine::new(db.clone());

        let set = entry(Command::Set(Set::new("name", "mars")));
        assert_eq!(sm.apply(1, &set), Frame::Simple("OK".into()));
        assert_eq!(db.get("name").unwrap(), "mars");

        // replay converges to the same state
        assert_eq!(sm.apply(1, &set), Frame::Simple("OK".into()));
        assert_eq!(db.get("name").unwrap(), "mars");

        let del = entry(Command::Delete(Delete::new("name")));
        assert_eq!(sm.apply(2, &del), Frame::Integer(1));
        assert_eq!(sm.apply(3, &del), Frame::Integer(0));
    }

    #[test]
    fn test_rejects_reads_and_garbage() {
        let sm = KvStateMachine::new(Arc::new(MemoryEngine::new()));

        let get = entry(Command::Get(Get::new("name")));
        assert!(matches!(sm.apply(1, &get), Frame::Error(_)));
        assert!(matches!(sm.apply(2, b"not a frame"), Frame::Error(_)));
    }

    #[test]
    fn test_restore_converges_to_snapshot() {
        let source = KvStateMachine::new(Arc::new(MemoryEngine::new()));
        source.apply(1, &entry(Command::Set(Set::new("a", "1"))));
        source.apply(2, &entry(Command::Set(Set::new("b", "2"))));
        let snapshot = source.snapshot().unwrap();

        let db = Arc::new(MemoryEngine::new());
        db.set("b".into(), "old".into()).unwrap();
        db.set("stale".into(), "x".into()).unwrap();
        let target = KvStateMachine::new(db.clone());
        target.restore(&snapshot).unwrap();

        assert_eq!(
            db.scan().unwrap(),
            vec![("a".into(), "1".into()), ("b".into(), "2".into())]
        );
        assert!(target.restore(b"not json").is_err());
    }
}
