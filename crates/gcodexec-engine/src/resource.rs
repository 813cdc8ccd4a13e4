//! Exclusive resources shared between channels
//!
//! The owner table lives behind one mutex so that an operation touching
//! several resources, or the axes-to-home set tied to the movement lock,
//! is observed as a whole by the dispatch loop and by asynchronous
//! signal handlers alike.
//!
//! Ownership is mirrored in the top machine-state frame of the owning
//! channel. When a macro frame is unwound only the bits it acquired are
//! released; bits inherited from the parent frame stay with the caller.

use crate::channel::{Channel, ChannelId, Channels};
use gcodexec_core::AxesBitmap;
use parking_lot::Mutex;
use std::fmt;

/// Number of heater resources
pub const MAX_HEATERS: usize = 8;

/// Total number of lockable resources
pub const NUM_RESOURCES: usize = 2 + MAX_HEATERS;

/// An exclusive capability arbitrated between channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// The motion system and the shared move state
    Movement,
    /// File store writes and directory listings
    FileSystem,
    /// One heater while a channel waits on it
    Heater(usize),
}

impl Resource {
    /// Index into the owner table
    pub fn index(&self) -> usize {
        match self {
            Self::Movement => 0,
            Self::FileSystem => 1,
            Self::Heater(n) => 2 + (*n).min(MAX_HEATERS - 1),
        }
    }

    /// Resource for an owner table index
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Movement),
            1 => Some(Self::FileSystem),
            n if n < NUM_RESOURCES => Some(Self::Heater(n - 2)),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movement => write!(f, "movement"),
            Self::FileSystem => write!(f, "file system"),
            Self::Heater(n) => write!(f, "heater {}", n),
        }
    }
}

/// A set of resources, one bit per resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ResourceSet(u32);

impl ResourceSet {
    /// The empty set
    pub const fn new() -> Self {
        Self(0)
    }

    /// Add a resource
    pub fn insert(&mut self, resource: Resource) {
        self.0 |= 1 << resource.index();
    }

    /// Remove a resource
    pub fn remove(&mut self, resource: Resource) {
        self.0 &= !(1 << resource.index());
    }

    /// Check whether a resource is present
    pub fn contains(&self, resource: Resource) -> bool {
        self.0 & (1 << resource.index()) != 0
    }

    /// True if no resource is present
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Raw bit pattern
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Iterate over the resources present
    pub fn iter(&self) -> impl Iterator<Item = Resource> + '_ {
        (0..NUM_RESOURCES)
            .filter(move |&i| self.0 & (1 << i) != 0)
            .filter_map(Resource::from_index)
    }
}

#[derive(Debug, Default)]
struct LockTable {
    owners: [Option<ChannelId>; NUM_RESOURCES],
    to_be_homed: AxesBitmap,
}

/// Owner table for every exclusive resource
#[derive(Debug, Default)]
pub struct ResourceLock {
    table: Mutex<LockTable>,
}

impl ResourceLock {
    /// Create an empty owner table
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a resource if it is free or already held by this channel
    ///
    /// Never blocks. On success the bit is recorded in the channel's top frame.
    pub fn try_lock(&self, channel: &mut Channel, resource: Resource) -> bool {
        let mut table = self.table.lock();
        let slot = &mut table.owners[resource.index()];
        match *slot {
            Some(owner) if owner != channel.id() => false,
            _ => {
                if slot.is_none() {
                    tracing::debug!("{} locked by {}", resource, channel.id());
                }
                *slot = Some(channel.id());
                channel.latest_mut().locked_resources.insert(resource);
                true
            }
        }
    }

    /// Take a resource unconditionally, returning the previous owner
    ///
    /// Only the previous owner's top frame loses the bit; a copy inherited
    /// from its parent frame is left alone.
    pub fn grab(
        &self,
        channels: &mut Channels,
        id: ChannelId,
        resource: Resource,
    ) -> Option<ChannelId> {
        let mut table = self.table.lock();
        let previous = table.owners[resource.index()].replace(id);
        if let Some(old) = previous.filter(|&old| old != id) {
            channels[old].latest_mut().locked_resources.remove(resource);
            tracing::debug!("{} grabbed by {} from {}", resource, id, old);
        }
        channels[id].latest_mut().locked_resources.insert(resource);
        previous
    }

    /// Release a resource if this channel owns it
    pub fn release(&self, channel: &mut Channel, resource: Resource) {
        let mut table = self.table.lock();
        Self::release_locked(&mut table, channel, resource);
    }

    /// Release everything this channel holds except what its parent frame holds
    pub fn release_all_except_inherited(&self, channel: &mut Channel) {
        let mut table = self.table.lock();
        let inherited = channel
            .parent()
            .map(|frame| frame.locked_resources)
            .unwrap_or_default();
        for index in 0..NUM_RESOURCES {
            let Some(resource) = Resource::from_index(index) else {
                continue;
            };
            if table.owners[index] == Some(channel.id()) && !inherited.contains(resource) {
                Self::release_locked(&mut table, channel, resource);
            }
        }
    }

    /// Release everything this channel holds, inherited or not
    pub fn release_all(&self, channel: &mut Channel) {
        let mut table = self.table.lock();
        for index in 0..NUM_RESOURCES {
            if table.owners[index] == Some(channel.id()) {
                if let Some(resource) = Resource::from_index(index) {
                    Self::release_locked(&mut table, channel, resource);
                }
            }
        }
        for frame in channel.frames_mut() {
            frame.locked_resources = ResourceSet::new();
        }
    }

    /// Current owner of a resource
    pub fn owner(&self, resource: Resource) -> Option<ChannelId> {
        self.table.lock().owners[resource.index()]
    }

    /// Drop every owner
    pub fn clear(&self) {
        let mut table = self.table.lock();
        *table = LockTable::default();
    }

    /// Axes still to be homed by the current G28
    pub fn to_be_homed(&self) -> AxesBitmap {
        self.table.lock().to_be_homed
    }

    /// Replace the axes still to be homed
    pub fn set_to_be_homed(&self, axes: AxesBitmap) {
        self.table.lock().to_be_homed = axes;
    }

    fn release_locked(table: &mut LockTable, channel: &mut Channel, resource: Resource) {
        let slot = &mut table.owners[resource.index()];
        if *slot == Some(channel.id()) {
            if resource == Resource::Movement {
                table.to_be_homed.clear();
            }
            *slot = None;
            channel.latest_mut().locked_resources.remove(resource);
            tracing::debug!("{} released by {}", resource, channel.id());
        }
    }
}
