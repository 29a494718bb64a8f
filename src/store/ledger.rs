use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::model::*;
use crate::wal::Wal;

use super::{AllocationStore, Assign, InventoryStore, StoreError};

pub type SharedUnit = Arc<RwLock<Unit>>;

/// Write guards for one commit, keyed (and therefore acquired) in id order.
type Guards = BTreeMap<UnitId, OwnedRwLockWriteGuard<Unit>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Each wakeup drains every append already queued and
/// covers the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

/// Write and fsync a batch. A batch that fails is cut back off the log, so
/// an event whose caller saw an error can never come back on replay.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let checkpoint = wal.checkpoint()?;
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        warn!("WAL batch of {} failed: {e}", batch.len());
        if let Err(undo) = wal.rollback(&checkpoint) {
            error!("WAL rollback failed, log may hold rejected events: {undo}");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory unit arena backed by an optional write-ahead log.
///
/// Each unit sits behind its own lock. Writers lock exactly the units an
/// event touches, always in ascending id order, so disjoint allocations
/// commit in parallel and overlapping ones serialize without deadlock.
/// Snapshots read-lock every unit in the same order and therefore never
/// observe half of a commit.
pub struct Ledger {
    units: DashMap<UnitId, SharedUnit>,
    allocations: DashMap<AllocationId, Allocation>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Serializes `UnitAdded` so two adds of one id can't both pass the check,
    /// and keeps adds out of a running compaction.
    add_lock: Mutex<()>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Ledger {
    /// A ledger with no log. State dies with the process.
    pub fn in_memory() -> Self {
        Self {
            units: DashMap::new(),
            allocations: DashMap::new(),
            wal_tx: None,
            add_lock: Mutex::new(()),
        }
    }

    /// Replay the log at `wal_path` and start its background writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut ledger = Self::in_memory();
        ledger.wal_tx = Some(wal_tx);
        let skipped = events.iter().filter(|e| !ledger.replay_event(e)).count();
        info!(
            "replayed {} events ({skipped} skipped): {} units, {} allocations",
            events.len(),
            ledger.units.len(),
            ledger.allocations.len()
        );
        Ok(ledger)
    }

    /// Apply one logged event under the same preconditions as a live commit.
    /// Returns false, and changes nothing, if they do not hold.
    fn replay_event(&self, event: &Event) -> bool {
        if let Event::UnitAdded { id, floor, position } = event {
            if self.units.contains_key(id) {
                warn!("replay: skipping duplicate unit {id}");
                return false;
            }
            self.units
                .insert(*id, Arc::new(RwLock::new(Unit::new(*id, *floor, *position))));
            return true;
        }
        // Nobody else holds these locks yet, so try_write always succeeds.
        let ids = self.ids_for(event);
        let mut guards: Guards = ids
            .iter()
            .filter_map(|&id| {
                let shared = self.units.get(&id)?.value().clone();
                shared.try_write_owned().ok().map(|g| (id, g))
            })
            .collect();
        if guards.len() != ids.len() {
            warn!("replay: skipping {} that names an unknown unit", event.label());
            return false;
        }
        if let Some(conflict) = Self::first_conflict(&guards, event) {
            warn!("replay: skipping {}, unit {conflict} does not match", event.label());
            return false;
        }
        self.apply_locked(&mut guards, event);
        true
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Add every unit of `layout` if the ledger holds none yet.
    /// Returns how many units were added.
    pub async fn seed(&self, layout: &Layout) -> Result<usize, StoreError> {
        if !self.units.is_empty() {
            debug!("ledger already holds {} units, skipping seed", self.units.len());
            return Ok(0);
        }
        let mut added = 0;
        for unit in layout.units() {
            let event = Event::UnitAdded {
                id: unit.id,
                floor: unit.floor,
                position: unit.position,
            };
            if self.conditional_bulk_assign(event).await? == Assign::Applied {
                added += 1;
            }
        }
        info!("seeded {added} units");
        Ok(added)
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    fn all_ids(&self) -> Vec<UnitId> {
        let mut ids: Vec<UnitId> = self.units.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    fn ids_for(&self, event: &Event) -> Vec<UnitId> {
        event.touched_units().unwrap_or_else(|| self.all_ids())
    }

    /// Write-lock `ids` (sorted) in order. Fails with the first unknown id.
    async fn lock_units(&self, ids: &[UnitId]) -> Result<Guards, UnitId> {
        let mut guards = Guards::new();
        for &id in ids {
            let shared = self.units.get(&id).map(|e| e.value().clone()).ok_or(id)?;
            guards.insert(id, shared.write_owned().await);
        }
        Ok(guards)
    }

    /// First unit whose current status breaks the event's precondition.
    fn first_conflict(guards: &Guards, event: &Event) -> Option<UnitId> {
        match event {
            Event::BlockAllocated { allocation } => allocation
                .unit_ids
                .iter()
                .find(|id| !guards[*id].is_available())
                .copied(),
            Event::OccupancyApplied { released, occupied } => {
                let releasing: HashSet<UnitId> = released.iter().copied().collect();
                released
                    .iter()
                    .find(|id| guards[*id].status != UnitStatus::Occupied)
                    .or_else(|| {
                        occupied
                            .iter()
                            .find(|id| !guards[*id].is_available() && !releasing.contains(*id))
                    })
                    .copied()
            }
            Event::InventoryReset { .. } | Event::UnitAdded { .. } => None,
        }
    }

    /// Mutate locked units (and allocation records) for an already-validated event.
    fn apply_locked(&self, guards: &mut Guards, event: &Event) {
        match event {
            Event::BlockAllocated { allocation } => {
                for id in &allocation.unit_ids {
                    if let Some(unit) = guards.get_mut(id) {
                        unit.status = UnitStatus::Allocated(allocation.id);
                    }
                }
                self.allocations.insert(allocation.id, allocation.clone());
            }
            Event::OccupancyApplied { released, occupied } => {
                for id in released {
                    if let Some(unit) = guards.get_mut(id) {
                        unit.status = UnitStatus::Available;
                    }
                }
                for id in occupied {
                    if let Some(unit) = guards.get_mut(id) {
                        unit.status = UnitStatus::Occupied;
                    }
                }
            }
            Event::InventoryReset { .. } => {
                for unit in guards.values_mut() {
                    unit.status = UnitStatus::Available;
                }
                for mut entry in self.allocations.iter_mut() {
                    entry.value_mut().state = AllocationState::Cancelled;
                }
            }
            // Inserted by the caller; there is no lock to hold yet.
            Event::UnitAdded { .. } => {}
        }
    }

    async fn add_unit(&self, id: UnitId, floor: u32, position: u32) -> Result<Assign, StoreError> {
        let event = Event::UnitAdded { id, floor, position };
        let _serial = self.add_lock.lock().await;
        if self.units.contains_key(&id) {
            return Ok(Assign::Conflict(id));
        }
        self.wal_append(&event).await?;
        self.units
            .insert(id, Arc::new(RwLock::new(Unit::new(id, floor, position))));
        Ok(Assign::Applied)
    }

    /// Rewrite the log as the shortest event list that rebuilds current state.
    /// Cancelled allocations are not carried over.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };

        // Units added while the event list is built would be lost with the
        // old log, so adds wait until the swap is done.
        let _serial = self.add_lock.lock().await;
        // Holding every unit's read lock keeps commits (and with them the
        // allocation map) still while the event list is built.
        let mut read_guards = Vec::with_capacity(self.units.len());
        for id in self.all_ids() {
            if let Some(shared) = self.units.get(&id).map(|e| e.value().clone()) {
                read_guards.push(shared.read_owned().await);
            }
        }

        let mut events: Vec<Event> = read_guards
            .iter()
            .map(|u| Event::UnitAdded {
                id: u.id,
                floor: u.floor,
                position: u.position,
            })
            .collect();

        let mut active: Vec<Allocation> = self
            .allocations
            .iter()
            .filter(|e| e.value().is_active())
            .map(|e| e.value().clone())
            .collect();
        active.sort_by_key(|a| a.id);
        events.extend(active.into_iter().map(|allocation| Event::BlockAllocated { allocation }));

        let occupied: Vec<UnitId> = read_guards
            .iter()
            .filter(|u| u.status == UnitStatus::Occupied)
            .map(|u| u.id)
            .collect();
        if !occupied.is_empty() {
            events.push(Event::OccupancyApplied {
                released: Vec::new(),
                occupied,
            });
        }

        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()));
        drop(read_guards);
        result
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl InventoryStore for Ledger {
    async fn list_units(&self) -> Result<Vec<Unit>, StoreError> {
        let mut guards = Vec::with_capacity(self.units.len());
        for id in self.all_ids() {
            if let Some(shared) = self.units.get(&id).map(|e| e.value().clone()) {
                guards.push(shared.read_owned().await);
            }
        }
        Ok(guards.iter().map(|g| **g).collect())
    }

    async fn conditional_bulk_assign(&self, event: Event) -> Result<Assign, StoreError> {
        if let Event::UnitAdded { id, floor, position } = event {
            return self.add_unit(id, floor, position).await;
        }

        let ids = self.ids_for(&event);
        let mut guards = match self.lock_units(&ids).await {
            Ok(guards) => guards,
            Err(unknown) => return Ok(Assign::Conflict(unknown)),
        };
        if let Some(conflict) = Self::first_conflict(&guards, &event) {
            debug!("{} rejected: unit {conflict} changed", event.label());
            return Ok(Assign::Conflict(conflict));
        }

        self.wal_append(&event).await?;
        self.apply_locked(&mut guards, &event);
        Ok(Assign::Applied)
    }
}

#[async_trait]
impl AllocationStore for Ledger {
    async fn list_active(&self, limit: usize) -> Result<Vec<Allocation>, StoreError> {
        let mut active: Vec<Allocation> = self
            .allocations
            .iter()
            .filter(|e| e.value().is_active())
            .map(|e| e.value().clone())
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        active.truncate(limit);
        Ok(active)
    }

    async fn get_allocation(&self, id: AllocationId) -> Result<Option<Allocation>, StoreError> {
        Ok(self.allocations.get(&id).map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomblock_test_ledger");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn block(ledger_units: &[Unit], ids: &[UnitId]) -> Event {
        let units: Vec<Unit> = ids
            .iter()
            .map(|id| *ledger_units.iter().find(|u| u.id == *id).unwrap())
            .collect();
        Event::BlockAllocated {
            allocation: Allocation::new(Ulid::new(), &units, 0, Source::Explicit, now_ms()),
        }
    }

    async fn seeded() -> Ledger {
        let ledger = Ledger::in_memory();
        ledger.seed(&Layout::default()).await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn seed_once() {
        let ledger = Ledger::in_memory();
        assert_eq!(ledger.seed(&Layout::default()).await.unwrap(), 97);
        assert_eq!(ledger.seed(&Layout::default()).await.unwrap(), 0);
        assert_eq!(ledger.unit_count(), 97);
    }

    #[tokio::test]
    async fn duplicate_unit_conflicts() {
        let ledger = seeded().await;
        let result = ledger
            .conditional_bulk_assign(Event::UnitAdded { id: 101, floor: 1, position: 1 })
            .await
            .unwrap();
        assert_eq!(result, Assign::Conflict(101));
    }

    #[tokio::test]
    async fn list_units_sorted_by_id() {
        let ledger = seeded().await;
        let units = ledger.list_units().await.unwrap();
        assert_eq!(units.len(), 97);
        assert!(units.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn block_allocation_marks_units_and_records() {
        let ledger = seeded().await;
        let units = ledger.list_units().await.unwrap();
        let event = block(&units, &[101, 102]);
        let Event::BlockAllocated { allocation } = &event else { unreachable!() };
        let alloc_id = allocation.id;

        assert_eq!(ledger.conditional_bulk_assign(event).await.unwrap(), Assign::Applied);

        let units = ledger.list_units().await.unwrap();
        let allocated: Vec<UnitId> = units
            .iter()
            .filter(|u| u.allocation_id() == Some(alloc_id))
            .map(|u| u.id)
            .collect();
        assert_eq!(allocated, vec![101, 102]);
        assert_eq!(ledger.list_available().await.unwrap().len(), 95);
        assert!(ledger.get_allocation(alloc_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn overlapping_block_conflicts_and_writes_nothing() {
        let ledger = seeded().await;
        let units = ledger.list_units().await.unwrap();
        ledger.conditional_bulk_assign(block(&units, &[102])).await.unwrap();

        let result = ledger
            .conditional_bulk_assign(block(&units, &[101, 102, 103]))
            .await
            .unwrap();
        assert_eq!(result, Assign::Conflict(102));

        let available: Vec<UnitId> = ledger
            .list_available()
            .await
            .unwrap()
            .iter()
            .map(|u| u.id)
            .collect();
        assert!(available.contains(&101));
        assert!(available.contains(&103));
        assert_eq!(ledger.list_active(50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_unit_conflicts() {
        let ledger = seeded().await;
        let allocation = Allocation::new(Ulid::new(), &[Unit::new(999, 9, 99)], 0, Source::Explicit, 0);
        let result = ledger
            .conditional_bulk_assign(Event::BlockAllocated { allocation })
            .await
            .unwrap();
        assert_eq!(result, Assign::Conflict(999));
    }

    #[tokio::test]
    async fn occupancy_preconditions() {
        let ledger = seeded().await;
        let ok = ledger
            .conditional_bulk_assign(Event::OccupancyApplied {
                released: vec![],
                occupied: vec![101, 102],
            })
            .await
            .unwrap();
        assert_eq!(ok, Assign::Applied);

        // 103 was never occupied, so it can't be released.
        let bad = ledger
            .conditional_bulk_assign(Event::OccupancyApplied {
                released: vec![101, 103],
                occupied: vec![],
            })
            .await
            .unwrap();
        assert_eq!(bad, Assign::Conflict(103));

        // Re-occupying a unit that is being released is fine.
        let reshuffle = ledger
            .conditional_bulk_assign(Event::OccupancyApplied {
                released: vec![101, 102],
                occupied: vec![102, 104],
            })
            .await
            .unwrap();
        assert_eq!(reshuffle, Assign::Applied);
        let units = ledger.list_units().await.unwrap();
        let occupied: Vec<UnitId> = units
            .iter()
            .filter(|u| u.status == UnitStatus::Occupied)
            .map(|u| u.id)
            .collect();
        assert_eq!(occupied, vec![102, 104]);
    }

    #[tokio::test]
    async fn reset_frees_units_and_cancels() {
        let ledger = seeded().await;
        let units = ledger.list_units().await.unwrap();
        ledger.conditional_bulk_assign(block(&units, &[501, 502])).await.unwrap();
        ledger
            .conditional_bulk_assign(Event::OccupancyApplied { released: vec![], occupied: vec![601] })
            .await
            .unwrap();

        ledger
            .conditional_bulk_assign(Event::InventoryReset { at: now_ms() })
            .await
            .unwrap();

        assert_eq!(ledger.list_available().await.unwrap().len(), 97);
        assert!(ledger.list_active(50).await.unwrap().is_empty());
        assert_eq!(ledger.allocations.len(), 1);
    }

    #[tokio::test]
    async fn list_active_newest_first_and_limited() {
        let ledger = seeded().await;
        let mut ids = Vec::new();
        for (i, unit_id) in [101, 102, 103].into_iter().enumerate() {
            let allocation = Allocation::new(
                Ulid::new(),
                &[Unit::new(unit_id, 1, unit_id % 100)],
                0,
                Source::Explicit,
                1_000 + i as Ms,
            );
            ids.push(allocation.id);
            ledger
                .conditional_bulk_assign(Event::BlockAllocated { allocation })
                .await
                .unwrap();
        }
        let listed: Vec<AllocationId> = ledger
            .list_active(2)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(listed, vec![ids[2], ids[1]]);
    }

    #[tokio::test]
    async fn wal_replay_restores_state() {
        let path = test_wal_path("replay_restores.wal");
        let alloc_id;
        {
            let ledger = Ledger::open(path.clone()).unwrap();
            ledger.seed(&Layout::default()).await.unwrap();
            let units = ledger.list_units().await.unwrap();
            let event = block(&units, &[301, 302, 303]);
            let Event::BlockAllocated { allocation } = &event else { unreachable!() };
            alloc_id = allocation.id;
            ledger.conditional_bulk_assign(event).await.unwrap();
            ledger
                .conditional_bulk_assign(Event::OccupancyApplied { released: vec![], occupied: vec![701] })
                .await
                .unwrap();
        }

        let ledger = Ledger::open(path).unwrap();
        assert_eq!(ledger.unit_count(), 97);
        let units = ledger.list_units().await.unwrap();
        let stats = InventoryStats::tally(&units);
        assert_eq!(stats.allocated, 3);
        assert_eq!(stats.occupied, 1);
        assert_eq!(ledger.get_allocation(alloc_id).await.unwrap().unwrap().unit_ids, vec![301, 302, 303]);
        // Seeding a replayed ledger is a no-op.
        assert_eq!(ledger.seed(&Layout::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn compact_preserves_live_state() {
        let path = test_wal_path("compact_live.wal");
        {
            let ledger = Ledger::open(path.clone()).unwrap();
            ledger.seed(&Layout::default()).await.unwrap();
            let units = ledger.list_units().await.unwrap();
            ledger.conditional_bulk_assign(block(&units, &[101])).await.unwrap();
            ledger
                .conditional_bulk_assign(Event::InventoryReset { at: 1 })
                .await
                .unwrap();
            ledger.conditional_bulk_assign(block(&units, &[201, 202])).await.unwrap();
            ledger
                .conditional_bulk_assign(Event::OccupancyApplied { released: vec![], occupied: vec![305] })
                .await
                .unwrap();

            assert_eq!(ledger.appends_since_compact().await, 97 + 4);
            ledger.compact().await.unwrap();
            assert_eq!(ledger.appends_since_compact().await, 0);
        }

        let ledger = Ledger::open(path).unwrap();
        let stats = InventoryStats::tally(&ledger.list_units().await.unwrap());
        assert_eq!(stats.total, 97);
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.occupied, 1);
        let active = ledger.list_active(50).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].unit_ids, vec![201, 202]);
        // Cancelled history is gone after compaction.
        assert_eq!(ledger.allocations.len(), 1);
    }

    #[tokio::test]
    async fn replay_skips_events_whose_preconditions_fail() {
        let path = test_wal_path("replay_double_grant.wal");
        let units = [Unit::new(101, 1, 1), Unit::new(102, 1, 2)];
        let first = Allocation::new(Ulid::new(), &units[..1], 0, Source::Optimal, 1);
        let second = Allocation::new(Ulid::new(), &units, 1, Source::Optimal, 2);
        {
            let mut wal = Wal::open(&path).unwrap();
            for unit in &units {
                wal.append(&Event::UnitAdded { id: unit.id, floor: 1, position: unit.position })
                    .unwrap();
            }
            wal.append(&Event::BlockAllocated { allocation: first.clone() }).unwrap();
            // Same unit again, as left behind by a commit that reported failure.
            wal.append(&Event::BlockAllocated { allocation: second.clone() }).unwrap();
            wal.append(&Event::UnitAdded { id: 101, floor: 1, position: 1 }).unwrap();
            wal.append(&Event::OccupancyApplied { released: vec![], occupied: vec![555] })
                .unwrap();
        }

        let ledger = Ledger::open(path.clone()).unwrap();
        assert_eq!(ledger.unit_count(), 2);
        let active = ledger.list_active(50).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.id);
        assert_eq!(ledger.get_allocation(second.id).await.unwrap(), None);

        let units = ledger.list_units().await.unwrap();
        assert_eq!(units[0].status, UnitStatus::Allocated(first.id));
        assert_eq!(units[1].status, UnitStatus::Available);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn compact_waits_for_unit_adds() {
        let path = test_wal_path("compact_vs_add.wal");
        let ledger = Ledger::open(path.clone()).unwrap();
        ledger.seed(&Layout::default()).await.unwrap();

        let add_in_flight = ledger.add_lock.lock().await;
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), ledger.compact()).await;
        assert!(blocked.is_err(), "compaction ran while a unit add held the lock");
        drop(add_in_flight);

        ledger.compact().await.unwrap();
        let added = ledger
            .conditional_bulk_assign(Event::UnitAdded { id: 1101, floor: 11, position: 1 })
            .await
            .unwrap();
        assert_eq!(added, Assign::Applied);
        drop(ledger);

        let ledger = Ledger::open(path.clone()).unwrap();
        assert_eq!(ledger.unit_count(), 98);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn in_memory_compact_is_noop() {
        let ledger = seeded().await;
        ledger.compact().await.unwrap();
        assert_eq!(ledger.appends_since_compact().await, 0);
    }
}
