//! Ограниченная арена слотов с непрозрачными дескрипторами.
//!
//! Дескриптор: `(поколение << 16) | (индекс + 1)`. Поколение растёт при
//! каждом освобождении слота, поэтому устаревший дескриптор уничтоженного
//! объекта не попадает в новый объект на том же месте.

use std::sync::Arc;

use kipc_error::{IpcError, IpcResult};

/// Предельная ёмкость: индекс занимает младшие 16 бит, значение
/// `0xFFFF_FFFF` зарезервировано.
pub const MAX_HANDLE_CAPACITY: usize = 0xFFFE;

const INDEX_BITS: u32 = 16;
const INDEX_MASK: u32 = 0xFFFF;

#[derive(Debug)]
struct Slot<T> {
    generation: u16,
    value: Option<Arc<T>>,
}

#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
    capacity: usize,
}

impl<T> HandleTable<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_HANDLE_CAPACITY);
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
            capacity,
        }
    }

    /// Размещает объект. Замыкание получает будущий дескриптор, чтобы
    /// объект мог хранить собственный идентификатор.
    ///
    /// Возвращает `NoMemory`, если таблица заполнена.
    pub fn insert_with(
        &mut self,
        make: impl FnOnce(u32) -> T,
    ) -> IpcResult<(u32, Arc<T>)> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                self.slots.len() - 1
            }
            None => return Err(IpcError::NoMemory),
        };

        let slot = &mut self.slots[index];
        let handle = encode(slot.generation, index);
        let value = Arc::new(make(handle));
        slot.value = Some(Arc::clone(&value));
        self.len += 1;
        Ok((handle, value))
    }

    pub fn get(
        &self,
        handle: u32,
    ) -> Option<Arc<T>> {
        let (generation, index) = decode(handle)?;
        let slot = self.slots.get(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.clone()
    }

    /// Освобождает слот и делает дескриптор недействительным.
    pub fn remove(
        &mut self,
        handle: u32,
    ) -> Option<Arc<T>> {
        let (generation, index) = decode(handle)?;
        let slot = self.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Живые объекты вместе с их дескрипторами.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Arc<T>)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (encode(slot.generation, index), value))
        })
    }
}

fn encode(
    generation: u16,
    index: usize,
) -> u32 {
    (u32::from(generation) << INDEX_BITS) | (index as u32 + 1)
}

fn decode(handle: u32) -> Option<(u16, usize)> {
    let low = handle & INDEX_MASK;
    if low == 0 {
        return None;
    }
    Some(((handle >> INDEX_BITS) as u16, (low - 1) as usize))
}
