//! In-process ledger
//!
//! Committed rows live in ordered maps behind a mutex. A transaction stages
//! its writes in its own maps and merges them on commit; savepoints snapshot
//! the staged maps. Row and unique-key locks are async mutexes owned by the
//! transaction until it finishes, so two transactions touching the same lot,
//! lot number or work order serialize the way they would on PostgreSQL.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use shared::{
    DashboardCounts, DashboardWindow, FullTruckWeight, Fumigation, FumigationFilter,
    FumigationStatus, FumigationWithLots, Lot, LotQc, LotQcInput, NewLot, NewReception,
    Packaging, Pagination, QcImages, QcMetrics, Reception, SampleQc, SampleQcInput,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::{
    finished, Ledger, LedgerTx, Savepoint, FUMIGATION_MEMBERSHIP_KEY, LOT_NUMBER_KEY, LOT_QC_KEY,
    WORK_ORDER_KEY,
};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Lot(i64),
    Reception(i64),
    Fumigation(i64),
    LotNumber(i32),
    WorkOrder(String),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Lot(id) => write!(f, "lot {}", id),
            LockKey::Reception(id) => write!(f, "reception {}", id),
            LockKey::Fumigation(id) => write!(f, "fumigation {}", id),
            LockKey::LotNumber(number) => write!(f, "lot number {:03}", number),
            LockKey::WorkOrder(work_order) => write!(f, "work order {}", work_order),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Tables {
    receptions: BTreeMap<i64, Reception>,
    packagings: BTreeMap<i64, Packaging>,
    lots: BTreeMap<i64, Lot>,
    /// Keyed by lot id
    truck_weights: BTreeMap<i64, FullTruckWeight>,
    fumigations: BTreeMap<i64, Fumigation>,
    /// Fumigation id to its member lot ids
    fumigation_lots: BTreeMap<i64, Vec<i64>>,
    /// Keyed by lot id
    lots_qc: BTreeMap<i64, LotQc>,
    samples_qc: BTreeMap<i64, SampleQc>,
}

fn merge<T: Clone>(target: &mut BTreeMap<i64, T>, source: &BTreeMap<i64, T>) {
    target.extend(source.iter().map(|(id, row)| (*id, row.clone())));
}

impl Tables {
    fn overlay(&mut self, staged: &Tables) {
        merge(&mut self.receptions, &staged.receptions);
        merge(&mut self.packagings, &staged.packagings);
        merge(&mut self.lots, &staged.lots);
        merge(&mut self.truck_weights, &staged.truck_weights);
        merge(&mut self.fumigations, &staged.fumigations);
        merge(&mut self.fumigation_lots, &staged.fumigation_lots);
        merge(&mut self.lots_qc, &staged.lots_qc);
        merge(&mut self.samples_qc, &staged.samples_qc);
    }
}

struct Store {
    committed: Mutex<Tables>,
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
    sequence: AtomicI64,
    clock: Mutex<Option<DateTime<Utc>>>,
    lock_timeout: Duration,
}

fn poisoned<T>(_: T) -> AppError {
    AppError::Internal("in-memory ledger state poisoned".to_string())
}

impl Store {
    fn committed(&self) -> AppResult<MutexGuard<'_, Tables>> {
        self.committed.lock().map_err(poisoned)
    }

    fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Microsecond timestamp, strictly increasing across the store
    fn stamp(&self) -> AppResult<DateTime<Utc>> {
        let mut last = self.clock.lock().map_err(poisoned)?;
        let mut now = Utc::now().trunc_subsecs(6);
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + chrono::Duration::microseconds(1);
            }
        }
        *last = Some(now);
        Ok(now)
    }

    fn lock_handle(&self, key: &LockKey) -> AppResult<Arc<AsyncMutex<()>>> {
        let mut locks = self.locks.lock().map_err(poisoned)?;
        Ok(locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }
}

/// Ledger kept entirely in memory, used by tests and local tooling
#[derive(Clone)]
pub struct MemoryLedger {
    store: Arc<Store>,
}

impl MemoryLedger {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            store: Arc::new(Store {
                committed: Mutex::new(Tables::default()),
                locks: Mutex::new(HashMap::new()),
                sequence: AtomicI64::new(1),
                clock: Mutex::new(None),
                lock_timeout,
            }),
        }
    }

    /// Reference data is maintained outside the pipeline; this seeds it
    pub fn insert_packaging(&self, name: &str, tare: Decimal) -> AppResult<Packaging> {
        let packaging = Packaging {
            id: self.store.next_id(),
            name: name.to_string(),
            tare,
            is_active: true,
        };
        self.store
            .committed()?
            .packagings
            .insert(packaging.id, packaging.clone());
        Ok(packaging)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        Ok(Box::new(MemoryTx {
            store: Arc::clone(&self.store),
            staged: Tables::default(),
            savepoints: Vec::new(),
            held: HashMap::new(),
            next_savepoint: 0,
            finished: false,
        }))
    }
}

/// Transaction over a [`MemoryLedger`]
pub struct MemoryTx {
    store: Arc<Store>,
    staged: Tables,
    savepoints: Vec<(Savepoint, Tables)>,
    held: HashMap<LockKey, OwnedMutexGuard<()>>,
    next_savepoint: u32,
    finished: bool,
}

impl MemoryTx {
    fn ensure_open(&self) -> AppResult<()> {
        if self.finished {
            return Err(finished());
        }
        Ok(())
    }

    /// Re-entrant exclusive lock, held until the transaction finishes
    async fn acquire(&mut self, key: LockKey) -> AppResult<()> {
        self.ensure_open()?;
        if self.held.contains_key(&key) {
            return Ok(());
        }
        let handle = self.store.lock_handle(&key)?;
        let guard = tokio::time::timeout(self.store.lock_timeout, handle.lock_owned())
            .await
            .map_err(|_| AppError::LockTimeout(key.to_string()))?;
        self.held.insert(key, guard);
        Ok(())
    }

    /// Own staged row first, then the latest committed row
    fn read<T: Clone>(&self, pick: impl Fn(&Tables) -> Option<&T>) -> AppResult<Option<T>> {
        self.ensure_open()?;
        if let Some(row) = pick(&self.staged) {
            return Ok(Some(row.clone()));
        }
        let committed = self.store.committed()?;
        Ok(pick(&committed).cloned())
    }

    /// Committed state with this transaction's writes applied
    fn view(&self) -> AppResult<Tables> {
        self.ensure_open()?;
        let mut tables = self.store.committed()?.clone();
        tables.overlay(&self.staged);
        Ok(tables)
    }

    fn savepoint_position(&self, savepoint: Savepoint) -> AppResult<usize> {
        self.savepoints
            .iter()
            .position(|(sp, _)| *sp == savepoint)
            .ok_or_else(|| AppError::Internal(format!("unknown savepoint {}", savepoint.name())))
    }

    fn finish(&mut self) {
        self.staged = Tables::default();
        self.savepoints.clear();
        // Dropping the guards releases every lock
        self.held.clear();
        self.finished = true;
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn savepoint(&mut self) -> AppResult<Savepoint> {
        self.ensure_open()?;
        self.next_savepoint += 1;
        let savepoint = Savepoint(self.next_savepoint);
        self.savepoints.push((savepoint, self.staged.clone()));
        Ok(savepoint)
    }

    async fn release_savepoint(&mut self, savepoint: Savepoint) -> AppResult<()> {
        self.ensure_open()?;
        let position = self.savepoint_position(savepoint)?;
        self.savepoints.truncate(position);
        Ok(())
    }

    /// Restores the staged writes; locks taken since the savepoint stay held
    async fn rollback_to_savepoint(&mut self, savepoint: Savepoint) -> AppResult<()> {
        self.ensure_open()?;
        let position = self.savepoint_position(savepoint)?;
        let (_, snapshot) = self.savepoints.swap_remove(position);
        self.savepoints.truncate(position);
        self.staged = snapshot;
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        self.ensure_open()?;
        {
            let mut committed = self.store.committed()?;
            committed.overlay(&self.staged);
        }
        self.finish();
        Ok(())
    }

    async fn rollback(&mut self) -> AppResult<()> {
        self.ensure_open()?;
        self.finish();
        Ok(())
    }

    async fn lock_lots(&mut self, ids: &[i64]) -> AppResult<Vec<Lot>> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut lots = Vec::with_capacity(ordered.len());
        for id in ordered {
            self.acquire(LockKey::Lot(id)).await?;
            if let Some(lot) = self.read(|t| t.lots.get(&id))? {
                lots.push(lot);
            }
        }
        Ok(lots)
    }

    async fn find_lot(&mut self, id: i64) -> AppResult<Option<Lot>> {
        self.read(|t| t.lots.get(&id))
    }

    async fn find_lot_by_number(&mut self, lot_number: i32) -> AppResult<Option<Lot>> {
        Ok(self
            .view()?
            .lots
            .into_values()
            .find(|lot| lot.lot_number == lot_number))
    }

    async fn insert_lot(&mut self, new_lot: &NewLot) -> AppResult<Lot> {
        self.acquire(LockKey::LotNumber(new_lot.lot_number)).await?;
        if self.find_lot_by_number(new_lot.lot_number).await?.is_some() {
            return Err(AppError::UniqueViolation(LOT_NUMBER_KEY.to_string()));
        }

        let lot = Lot {
            id: self.store.next_id(),
            reception_id: new_lot.reception_id,
            variety_id: new_lot.variety_id,
            packaging_id: new_lot.packaging_id,
            lot_number: new_lot.lot_number,
            packagings_quantity: new_lot.packagings_quantity,
            net_weight: None,
            has_qc: false,
            fumigation_status: FumigationStatus::Available,
            on_warehouse: true,
            created_at: self.store.stamp()?,
            updated_at: None,
        };
        self.acquire(LockKey::Lot(lot.id)).await?;
        self.staged.lots.insert(lot.id, lot.clone());
        Ok(lot)
    }

    async fn save_lot(&mut self, lot: &Lot) -> AppResult<Lot> {
        self.acquire(LockKey::Lot(lot.id)).await?;
        let mut stored = self
            .read(|t| t.lots.get(&lot.id))?
            .ok_or_else(|| AppError::NotFound(format!("Lot {}", lot.id)))?;

        // Lot number and ownership are immutable
        stored.packagings_quantity = lot.packagings_quantity;
        stored.net_weight = lot.net_weight;
        stored.has_qc = lot.has_qc;
        stored.fumigation_status = lot.fumigation_status;
        stored.on_warehouse = lot.on_warehouse;
        stored.updated_at = Some(self.store.stamp()?);

        self.staged.lots.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_lots_by_status(&mut self, statuses: &[FumigationStatus]) -> AppResult<Vec<Lot>> {
        let mut lots: Vec<Lot> = self
            .view()?
            .lots
            .into_values()
            .filter(|lot| statuses.contains(&lot.fumigation_status))
            .collect();
        lots.sort_by_key(|lot| lot.lot_number);
        Ok(lots)
    }

    async fn insert_reception(&mut self, new_reception: &NewReception) -> AppResult<Reception> {
        self.ensure_open()?;
        let reception = Reception {
            id: self.store.next_id(),
            waybill: new_reception.waybill,
            date: new_reception.date,
            time: new_reception.time,
            truck_plate: new_reception.truck_plate.clone(),
            trucker_name: new_reception.trucker_name.clone(),
            observations: new_reception.observations.clone(),
            is_open: true,
            created_at: self.store.stamp()?,
            updated_at: None,
        };
        self.acquire(LockKey::Reception(reception.id)).await?;
        self.staged.receptions.insert(reception.id, reception.clone());
        Ok(reception)
    }

    async fn find_reception(&mut self, id: i64) -> AppResult<Option<Reception>> {
        self.read(|t| t.receptions.get(&id))
    }

    async fn lock_reception(&mut self, id: i64) -> AppResult<Option<Reception>> {
        self.acquire(LockKey::Reception(id)).await?;
        self.read(|t| t.receptions.get(&id))
    }

    async fn save_reception(&mut self, reception: &Reception) -> AppResult<Reception> {
        self.acquire(LockKey::Reception(reception.id)).await?;
        let mut stored = self
            .read(|t| t.receptions.get(&reception.id))?
            .ok_or_else(|| AppError::NotFound(format!("Reception {}", reception.id)))?;

        stored.is_open = reception.is_open;
        stored.observations = reception.observations.clone();
        stored.updated_at = Some(self.store.stamp()?);

        self.staged.receptions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_packaging(&mut self, id: i64) -> AppResult<Option<Packaging>> {
        self.read(|t| t.packagings.get(&id))
    }

    async fn find_truck_weight(&mut self, lot_id: i64) -> AppResult<Option<FullTruckWeight>> {
        self.read(|t| t.truck_weights.get(&lot_id))
    }

    async fn save_truck_weight(
        &mut self,
        lot_id: i64,
        loaded_truck_weight: Decimal,
        empty_truck_weight: Decimal,
    ) -> AppResult<FullTruckWeight> {
        self.acquire(LockKey::Lot(lot_id)).await?;
        let weight = match self.read(|t| t.truck_weights.get(&lot_id))? {
            Some(mut existing) => {
                existing.loaded_truck_weight = loaded_truck_weight;
                existing.empty_truck_weight = empty_truck_weight;
                existing.updated_at = Some(self.store.stamp()?);
                existing
            }
            None => FullTruckWeight {
                id: self.store.next_id(),
                lot_id,
                loaded_truck_weight,
                empty_truck_weight,
                created_at: self.store.stamp()?,
                updated_at: None,
            },
        };
        self.staged.truck_weights.insert(lot_id, weight.clone());
        Ok(weight)
    }

    async fn find_fumigation_by_work_order(
        &mut self,
        work_order: &str,
    ) -> AppResult<Option<Fumigation>> {
        Ok(self
            .view()?
            .fumigations
            .into_values()
            .find(|fumigation| fumigation.work_order == work_order))
    }

    async fn find_fumigation(&mut self, id: i64) -> AppResult<Option<Fumigation>> {
        self.read(|t| t.fumigations.get(&id))
    }

    async fn lock_fumigation(&mut self, id: i64) -> AppResult<Option<Fumigation>> {
        self.acquire(LockKey::Fumigation(id)).await?;
        self.read(|t| t.fumigations.get(&id))
    }

    async fn insert_fumigation(
        &mut self,
        work_order: &str,
        lot_ids: &[i64],
    ) -> AppResult<Fumigation> {
        self.acquire(LockKey::WorkOrder(work_order.to_string()))
            .await?;
        if self.find_fumigation_by_work_order(work_order).await?.is_some() {
            return Err(AppError::UniqueViolation(WORK_ORDER_KEY.to_string()));
        }

        let mut members = lot_ids.to_vec();
        members.sort_unstable();
        members.dedup();
        for lot_id in &members {
            self.acquire(LockKey::Lot(*lot_id)).await?;
        }
        let tables = self.view()?;
        let already_member = tables
            .fumigation_lots
            .values()
            .any(|existing| existing.iter().any(|id| members.contains(id)));
        if already_member {
            return Err(AppError::UniqueViolation(
                FUMIGATION_MEMBERSHIP_KEY.to_string(),
            ));
        }

        let fumigation = Fumigation {
            id: self.store.next_id(),
            work_order: work_order.to_string(),
            real_start_date: None,
            real_start_time: None,
            real_end_date: None,
            real_end_time: None,
            fumigation_sign_path: None,
            work_order_path: None,
            certificate_path: None,
            created_at: self.store.stamp()?,
            updated_at: None,
        };
        self.acquire(LockKey::Fumigation(fumigation.id)).await?;
        self.staged
            .fumigations
            .insert(fumigation.id, fumigation.clone());
        self.staged.fumigation_lots.insert(fumigation.id, members);
        Ok(fumigation)
    }

    async fn save_fumigation(&mut self, fumigation: &Fumigation) -> AppResult<Fumigation> {
        self.acquire(LockKey::Fumigation(fumigation.id)).await?;
        let mut stored = self
            .read(|t| t.fumigations.get(&fumigation.id))?
            .ok_or_else(|| AppError::NotFound(format!("Fumigation {}", fumigation.id)))?;

        stored.real_start_date = fumigation.real_start_date;
        stored.real_start_time = fumigation.real_start_time;
        stored.real_end_date = fumigation.real_end_date;
        stored.real_end_time = fumigation.real_end_time;
        stored.fumigation_sign_path = fumigation.fumigation_sign_path.clone();
        stored.work_order_path = fumigation.work_order_path.clone();
        stored.certificate_path = fumigation.certificate_path.clone();
        stored.updated_at = Some(self.store.stamp()?);

        self.staged.fumigations.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn fumigation_lot_ids(&mut self, fumigation_id: i64) -> AppResult<Vec<i64>> {
        Ok(self
            .read(|t| t.fumigation_lots.get(&fumigation_id))?
            .unwrap_or_default())
    }

    async fn list_fumigations(
        &mut self,
        filter: &FumigationFilter,
        pagination: Pagination,
    ) -> AppResult<(Vec<FumigationWithLots>, u64)> {
        let tables = self.view()?;
        let needle = filter
            .work_order
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut matches: Vec<FumigationWithLots> = tables
            .fumigations
            .values()
            .rev()
            .filter(|f| {
                needle
                    .as_ref()
                    .map_or(true, |n| f.work_order.to_lowercase().contains(n))
            })
            .map(|fumigation| {
                let mut lots: Vec<Lot> = tables
                    .fumigation_lots
                    .get(&fumigation.id)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| tables.lots.get(id).cloned())
                    .collect();
                lots.sort_by_key(|lot| lot.lot_number);
                FumigationWithLots {
                    fumigation: fumigation.clone(),
                    lots,
                }
            })
            .filter(|item| filter.phase.map_or(true, |phase| item.phase() == Some(phase)))
            .collect();

        // Newest first; ids grow with creation time
        matches.sort_by(|a, b| {
            b.fumigation
                .created_at
                .cmp(&a.fumigation.created_at)
                .then(b.fumigation.id.cmp(&a.fumigation.id))
        });

        let total = matches.len() as u64;
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        let page = matches
            .into_iter()
            .skip(offset)
            .take(pagination.per_page as usize)
            .collect();
        Ok((page, total))
    }

    async fn insert_lot_qc(
        &mut self,
        input: &LotQcInput,
        metrics: &QcMetrics,
        images: &QcImages,
    ) -> AppResult<LotQc> {
        self.acquire(LockKey::Lot(input.lot_id)).await?;
        if self.read(|t| t.lots.get(&input.lot_id))?.is_none() {
            return Err(AppError::NotFound(format!("Lot {}", input.lot_id)));
        }
        if self.read(|t| t.lots_qc.get(&input.lot_id))?.is_some() {
            return Err(AppError::UniqueViolation(LOT_QC_KEY.to_string()));
        }

        let record = LotQc {
            id: self.store.next_id(),
            lot_id: input.lot_id,
            measurements: input.measurements.clone(),
            metrics: *metrics,
            images: images.clone(),
            created_at: self.store.stamp()?,
            updated_at: None,
        };
        self.staged.lots_qc.insert(record.lot_id, record.clone());
        Ok(record)
    }

    async fn find_lot_qc(&mut self, lot_id: i64) -> AppResult<Option<LotQc>> {
        self.read(|t| t.lots_qc.get(&lot_id))
    }

    async fn find_sample_qc(&mut self, id: i64) -> AppResult<Option<SampleQc>> {
        self.read(|t| t.samples_qc.get(&id))
    }

    async fn insert_sample_qc(
        &mut self,
        input: &SampleQcInput,
        metrics: &QcMetrics,
        images: &QcImages,
    ) -> AppResult<SampleQc> {
        self.ensure_open()?;
        let record = SampleQc {
            id: self.store.next_id(),
            grower: input.grower.clone(),
            brought_by: input.brought_by.clone(),
            measurements: input.measurements.clone(),
            metrics: *metrics,
            images: images.clone(),
            created_at: self.store.stamp()?,
            updated_at: None,
        };
        self.staged.samples_qc.insert(record.id, record.clone());
        Ok(record)
    }

    async fn dashboard_counts(&mut self, window: &DashboardWindow) -> AppResult<DashboardCounts> {
        let tables = self.view()?;
        let mut counts = DashboardCounts::default();

        for lot in tables.lots.values() {
            let weighed = lot.net_weight.filter(|w| *w > Decimal::ZERO);

            if lot.created_at >= window.today_start && lot.created_at < window.today_end {
                counts.lots_received_today += 1;
                counts.kilograms_received_today += weighed.unwrap_or(Decimal::ZERO);
            }
            if let Some(index) = FumigationStatus::ALL
                .iter()
                .position(|status| *status == lot.fumigation_status)
            {
                counts.status_counts[index] += 1;
            }
            if lot.created_at < window.no_qc_cutoff && !tables.lots_qc.contains_key(&lot.id) {
                counts.no_qc += 1;
            }
            if lot.created_at < window.missing_net_weight_cutoff && weighed.is_none() {
                counts.missing_net_weight += 1;
            }
            if lot.created_at < window.no_fumigation_cutoff
                && lot.fumigation_status == FumigationStatus::Available
            {
                counts.no_fumigation += 1;
            }
        }
        Ok(counts)
    }
}
