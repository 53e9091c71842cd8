//! Per-player records held by the GameData component.

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferReader, BufferWriter};
use crate::ProtocolError;

const FLAG_DISCONNECTED: u8 = 0x01;
const FLAG_IMPOSTOR: u8 = 0x02;
const FLAG_DEAD: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: u32,
    pub completed: bool,
}

/// Everything the game knows about one player slot.
///
/// `player_id` is not part of the serialized record; containers write it
/// next to the record (as a prefix byte or as the nested message tag).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: u8,
    pub name: String,
    pub color: u8,
    pub hat: u32,
    pub pet: u32,
    pub skin: u32,
    pub disconnected: bool,
    pub impostor: bool,
    pub dead: bool,
    pub tasks: Vec<TaskState>,
}

impl PlayerInfo {
    pub fn new(player_id: u8) -> Self {
        Self {
            player_id,
            ..Self::default()
        }
    }

    pub fn read(player_id: u8, r: &mut BufferReader<'_>) -> Result<Self, ProtocolError> {
        let name = r.read_string()?;
        let color = r.read_u8()?;
        let hat = r.read_packed_u32()?;
        let pet = r.read_packed_u32()?;
        let skin = r.read_packed_u32()?;
        let flags = r.read_u8()?;
        let task_count = r.read_u8()?;
        let mut tasks = Vec::with_capacity(task_count as usize);
        for _ in 0..task_count {
            tasks.push(TaskState {
                task_id: r.read_packed_u32()?,
                completed: r.read_bool()?,
            });
        }
        Ok(Self {
            player_id,
            name,
            color,
            hat,
            pet,
            skin,
            disconnected: flags & FLAG_DISCONNECTED != 0,
            impostor: flags & FLAG_IMPOSTOR != 0,
            dead: flags & FLAG_DEAD != 0,
            tasks,
        })
    }

    pub fn write(&self, w: &mut BufferWriter) {
        w.write_string(&self.name);
        w.write_u8(self.color);
        w.write_packed_u32(self.hat);
        w.write_packed_u32(self.pet);
        w.write_packed_u32(self.skin);
        w.write_u8(self.flags());
        w.write_u8(self.tasks.len().min(u8::MAX as usize) as u8);
        for task in self.tasks.iter().take(u8::MAX as usize) {
            w.write_packed_u32(task.task_id);
            w.write_bool(task.completed);
        }
    }

    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.disconnected {
            flags |= FLAG_DISCONNECTED;
        }
        if self.impostor {
            flags |= FLAG_IMPOSTOR;
        }
        if self.dead {
            flags |= FLAG_DEAD;
        }
        flags
    }

    /// Replaces the task list with fresh, incomplete tasks.
    pub fn set_tasks(&mut self, task_ids: &[u8]) {
        self.tasks = task_ids
            .iter()
            .map(|&id| TaskState {
                task_id: u32::from(id),
                completed: false,
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_layout_matches_wire_order() {
        let info = PlayerInfo {
            player_id: 3,
            name: "ab".into(),
            color: 5,
            hat: 1,
            pet: 2,
            skin: 3,
            dead: true,
            impostor: true,
            tasks: vec![TaskState { task_id: 7, completed: true }],
            ..PlayerInfo::default()
        };
        let mut w = BufferWriter::new();
        info.write(&mut w);

        assert_eq!(w.as_slice(), &[2, b'a', b'b', 5, 1, 2, 3, 0x06, 1, 7, 1]);

        let decoded = PlayerInfo::read(3, &mut BufferReader::new(w.as_slice())).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_set_tasks_resets_completion() {
        let mut info = PlayerInfo::new(0);
        info.tasks = vec![TaskState { task_id: 1, completed: true }];
        info.set_tasks(&[4, 9]);
        assert_eq!(info.tasks.len(), 2);
        assert!(info.tasks.iter().all(|t| !t.completed));
    }
}
