//! RTOS task specifications.

use crate::error::{SpecError, TaskSpecError};
use crate::key::{fold_name, Key};
use std::collections::HashMap;

/// Largest task id; ids are bit indexes in a 32-bit mask.
pub const MAX_TASK_ID: u8 = 31;

/// Longest task name. The on-board buffer is one byte longer for the terminator.
pub const MAX_TASK_NAME_LEN: usize = 21;

/// One RTOS task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    name: String,
    id: u8,
    stack_size: u32,
    priority: u8,
}

impl TaskSpec {
    /// Create a task spec, checking the id and name limits.
    pub fn new(name: impl Into<String>, id: u64, stack_size: u32, priority: u8) -> Result<Self, TaskSpecError> {
        let name = name.into();
        if id > u64::from(MAX_TASK_ID) {
            return Err(TaskSpecError::IdOutOfRange {
                name,
                id,
                max: MAX_TASK_ID,
            });
        }
        let len = name.chars().count();
        if len > MAX_TASK_NAME_LEN {
            return Err(TaskSpecError::NameTooLong {
                name,
                len,
                max: MAX_TASK_NAME_LEN,
            });
        }
        Ok(TaskSpec {
            name,
            id: id as u8,
            stack_size,
            priority,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn stack_size(&self) -> u32 {
        self.stack_size
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// This task's bit in a task mask.
    pub fn mask_bit(&self) -> u32 {
        1u32 << self.id
    }
}

/// All tasks of one OBC build.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Vec<TaskSpec>,
    by_id: [Option<usize>; 32],
    by_name: HashMap<String, usize>,
}

impl TaskRegistry {
    /// Build a registry, rejecting duplicate ids and names.
    pub fn new(tasks: Vec<TaskSpec>) -> Result<Self, TaskSpecError> {
        let mut by_id = [None; 32];
        let mut by_name = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            let slot = &mut by_id[usize::from(task.id)];
            if let Some(prev) = *slot {
                let first: &TaskSpec = &tasks[prev];
                return Err(TaskSpecError::DuplicateId {
                    id: task.id,
                    first: first.name.clone(),
                    second: task.name.clone(),
                });
            }
            *slot = Some(i);
            if by_name.insert(fold_name(&task.name), i).is_some() {
                return Err(TaskSpecError::DuplicateName {
                    name: task.name.clone(),
                });
            }
        }
        Ok(TaskRegistry { tasks, by_id, by_name })
    }

    /// Look up a task by name or id.
    pub fn get<'a>(&self, key: impl Into<Key<'a>>) -> Result<&TaskSpec, SpecError> {
        let key = key.into();
        let found = match key {
            Key::Name(name) => self.by_name.get(&fold_name(name)).copied(),
            Key::Id(id) => usize::try_from(id)
                .ok()
                .and_then(|id| self.by_id.get(id).copied().flatten()),
        };
        found
            .map(|i| &self.tasks[i])
            .ok_or_else(|| SpecError::not_found("task", key))
    }

    /// Combined mask of the given tasks.
    pub fn mask_of<'a, K: Into<Key<'a>>>(&self, keys: impl IntoIterator<Item = K>) -> Result<u32, SpecError> {
        keys.into_iter()
            .try_fold(0u32, |mask, key| Ok::<_, SpecError>(mask | self.get(key)?.mask_bit()))
    }

    /// Tasks whose bit is set in `mask`, in id order. Unregistered bits are skipped.
    pub fn tasks_in_mask(&self, mask: u32) -> Vec<&TaskSpec> {
        (0..=MAX_TASK_ID)
            .filter(|bit| mask & (1u32 << bit) != 0)
            .filter_map(|bit| self.by_id[usize::from(bit)].map(|i| &self.tasks[i]))
            .collect()
    }

    /// Tasks in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskSpec> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
