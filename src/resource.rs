//! Resources with capacity, calendars and a per-day allocation ledger.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::calendar::Calendar;
use crate::EPS;

/// Errors raised by the resource registry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    #[error(
        "Cannot allocate {requested} units of {resource} on {day}: only {available} available"
    )]
    Overallocation {
        resource: String,
        day: NaiveDate,
        requested: f64,
        available: f64,
    },
    #[error("Unknown resource: {0}")]
    UnknownResource(String),
}

/// One booked slot: a task holding units of a resource for a day.
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
    pub task_id: String,
    pub units: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowKind {
    Arrival,
    Departure,
}

/// Work arriving at or leaving a resource, for flow analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowEvent {
    pub date: NaiveDate,
    pub task_id: String,
    pub kind: FlowKind,
}

/// A named resource: concurrent units available at full day, scaled by its
/// calendar.
#[derive(Clone, Debug)]
pub struct Resource {
    pub name: String,
    pub capacity: f64,
    pub calendar: Calendar,
    pub allow_overallocation: bool,
    pub tags: BTreeSet<String>,
    allocations: BTreeMap<NaiveDate, Vec<Allocation>>,
    /// Excess units booked per day when overallocation is allowed.
    overallocations: BTreeMap<NaiveDate, f64>,
    pub flow_events: Vec<FlowEvent>,
}

impl Resource {
    pub fn new(name: impl Into<String>, capacity: f64) -> Self {
        Self {
            name: name.into(),
            capacity,
            calendar: Calendar::full_time(),
            allow_overallocation: false,
            tags: BTreeSet::new(),
            allocations: BTreeMap::new(),
            overallocations: BTreeMap::new(),
            flow_events: Vec::new(),
        }
    }

    pub fn with_calendar(mut self, calendar: Calendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_allow_overallocation(mut self, allow: bool) -> Self {
        self.allow_overallocation = allow;
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    /// Units this resource can supply on a day: capacity scaled by calendar
    /// availability.
    pub fn capacity_on(&self, day: NaiveDate) -> f64 {
        self.capacity * self.calendar.availability(day)
    }

    /// Units already booked on a day.
    pub fn allocated_units(&self, day: NaiveDate) -> f64 {
        self.allocations
            .get(&day)
            .map(|allocs| allocs.iter().map(|a| a.units).sum())
            .unwrap_or(0.0)
    }

    /// Units still free on a day.
    pub fn available_units(&self, day: NaiveDate) -> f64 {
        self.capacity_on(day) - self.allocated_units(day)
    }

    /// Book units for a task on a day. Fails when the day cannot supply the
    /// units, unless overallocation is allowed, in which case the excess is
    /// recorded instead.
    pub fn allocate(
        &mut self,
        day: NaiveDate,
        units: f64,
        task_id: &str,
    ) -> Result<(), AllocationError> {
        let available = self.available_units(day);
        if units > available + EPS && !self.allow_overallocation {
            return Err(AllocationError::Overallocation {
                resource: self.name.clone(),
                day,
                requested: units,
                available: available.max(0.0),
            });
        }

        self.allocations.entry(day).or_default().push(Allocation {
            task_id: task_id.to_string(),
            units,
        });

        let excess = self.allocated_units(day) - self.capacity_on(day);
        if excess > EPS {
            self.overallocations.insert(day, excess);
        }
        Ok(())
    }

    /// Remove a task's booking on a day, returning the units released.
    pub fn deallocate(&mut self, day: NaiveDate, task_id: &str) -> f64 {
        let Some(allocs) = self.allocations.get_mut(&day) else {
            return 0.0;
        };
        let mut released = 0.0;
        allocs.retain(|a| {
            if a.task_id == task_id {
                released += a.units;
                false
            } else {
                true
            }
        });
        if allocs.is_empty() {
            self.allocations.remove(&day);
        }
        let excess = self.allocated_units(day) - self.capacity_on(day);
        if excess > EPS {
            self.overallocations.insert(day, excess);
        } else {
            self.overallocations.remove(&day);
        }
        released
    }

    pub fn allocations_on(&self, day: NaiveDate) -> &[Allocation] {
        self.allocations
            .get(&day)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Does any day carry more units than the resource can supply?
    pub fn is_overallocated(&self) -> bool {
        !self.overallocations.is_empty()
    }

    pub fn overallocated_days(&self) -> impl Iterator<Item = (&NaiveDate, &f64)> {
        self.overallocations.iter()
    }

    pub fn record_arrival(&mut self, task_id: &str, date: NaiveDate) {
        self.flow_events.push(FlowEvent {
            date,
            task_id: task_id.to_string(),
            kind: FlowKind::Arrival,
        });
    }

    pub fn record_departure(&mut self, task_id: &str, date: NaiveDate) {
        self.flow_events.push(FlowEvent {
            date,
            task_id: task_id.to_string(),
            kind: FlowKind::Departure,
        });
    }

    fn clear_allocations(&mut self) {
        self.allocations.clear();
        self.overallocations.clear();
    }
}

/// Owns every resource of a schedule. Keyed and iterated by name for
/// deterministic output.
#[derive(Clone, Debug, Default)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, Resource>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource, replacing any previous definition of the name.
    pub fn register(&mut self, resource: Resource) {
        self.resources.insert(resource.name.clone(), resource);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&Resource, AllocationError> {
        self.resources
            .get(name)
            .ok_or_else(|| AllocationError::UnknownResource(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Resource, AllocationError> {
        self.resources
            .get_mut(name)
            .ok_or_else(|| AllocationError::UnknownResource(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn allocate(
        &mut self,
        name: &str,
        day: NaiveDate,
        units: f64,
        task_id: &str,
    ) -> Result<(), AllocationError> {
        self.get_mut(name)?.allocate(day, units, task_id)
    }

    pub fn deallocate(&mut self, name: &str, day: NaiveDate, task_id: &str) -> f64 {
        self.resources
            .get_mut(name)
            .map(|r| r.deallocate(day, task_id))
            .unwrap_or(0.0)
    }

    /// Units of a resource booked on a day.
    pub fn utilization(&self, name: &str, day: NaiveDate) -> Result<f64, AllocationError> {
        Ok(self.get(name)?.allocated_units(day))
    }

    /// Book units on every listed day, rolling back the whole span when any
    /// day fails.
    pub fn allocate_span(
        &mut self,
        name: &str,
        task_id: &str,
        days: &[NaiveDate],
        units: f64,
    ) -> Result<(), AllocationError> {
        let resource = self.get_mut(name)?;
        let mut booked: Vec<NaiveDate> = Vec::with_capacity(days.len());
        for &day in days {
            match resource.allocate(day, units, task_id) {
                Ok(()) => booked.push(day),
                Err(err) => {
                    for &done in &booked {
                        resource.deallocate(done, task_id);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub fn is_overallocated(&self) -> bool {
        self.resources.values().any(Resource::is_overallocated)
    }

    /// Drop every booking. Used between leveling iterations.
    pub fn clear_allocations(&mut self) {
        for resource in self.resources.values_mut() {
            resource.clear_allocations();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn test_allocate_within_capacity() {
        let mut resource = Resource::new("dev", 2.0);
        resource.allocate(d(2025, 4, 1), 1.0, "t1").unwrap();
        resource.allocate(d(2025, 4, 1), 1.0, "t2").unwrap();

        assert!((resource.allocated_units(d(2025, 4, 1)) - 2.0).abs() < 1e-9);
        assert!(!resource.is_overallocated());
    }

    #[test]
    fn test_overallocation_rejected() {
        let mut resource = Resource::new("dev", 1.0);
        resource.allocate(d(2025, 4, 1), 1.0, "t1").unwrap();

        let err = resource.allocate(d(2025, 4, 1), 0.5, "t2").unwrap_err();
        match err {
            AllocationError::Overallocation {
                resource,
                day,
                requested,
                available,
            } => {
                assert_eq!(resource, "dev");
                assert_eq!(day, d(2025, 4, 1));
                assert!((requested - 0.5).abs() < 1e-9);
                assert!(available.abs() < 1e-9);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_overallocation_recorded_when_allowed() {
        let mut resource = Resource::new("dev", 1.0).with_allow_overallocation(true);
        resource.allocate(d(2025, 4, 1), 1.0, "t1").unwrap();
        resource.allocate(d(2025, 4, 1), 0.5, "t2").unwrap();

        assert!(resource.is_overallocated());
        let (day, excess) = resource.overallocated_days().next().unwrap();
        assert_eq!(*day, d(2025, 4, 1));
        assert!((excess - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_calendar_scales_capacity() {
        let mut cal = Calendar::full_time();
        cal.set_availability(d(2025, 4, 2), 0.5);
        let mut resource = Resource::new("designer", 1.0).with_calendar(cal);

        resource.allocate(d(2025, 4, 2), 0.5, "t1").unwrap();
        assert!(resource.allocate(d(2025, 4, 2), 0.5, "t2").is_err());
    }

    #[test]
    fn test_fractional_units() {
        let mut resource = Resource::new("designer", 1.0);
        resource.allocate(d(2025, 4, 1), 0.5, "t1").unwrap();
        resource.allocate(d(2025, 4, 1), 0.5, "t2").unwrap();
        assert!((resource.available_units(d(2025, 4, 1))).abs() < 1e-9);
    }

    #[test]
    fn test_deallocate_releases_units() {
        let mut resource = Resource::new("dev", 1.0);
        resource.allocate(d(2025, 4, 1), 1.0, "t1").unwrap();
        let released = resource.deallocate(d(2025, 4, 1), "t1");

        assert!((released - 1.0).abs() < 1e-9);
        assert!((resource.available_units(d(2025, 4, 1)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_span_rolls_back_on_failure() {
        let mut registry = ResourceRegistry::new();
        registry.register(Resource::new("dev", 1.0));
        // Day 3 is already taken, so a 4-day span must fail and release
        // days 1 and 2.
        registry.allocate("dev", d(2025, 4, 3), 1.0, "t0").unwrap();

        let days = [d(2025, 4, 1), d(2025, 4, 2), d(2025, 4, 3), d(2025, 4, 4)];
        let result = registry.allocate_span("dev", "t1", &days, 1.0);
        assert!(result.is_err());

        let resource = registry.get("dev").unwrap();
        assert!((resource.allocated_units(d(2025, 4, 1))).abs() < 1e-9);
        assert!((resource.allocated_units(d(2025, 4, 2))).abs() < 1e-9);
        assert!((resource.allocated_units(d(2025, 4, 3)) - 1.0).abs() < 1e-9);
        assert!((resource.allocated_units(d(2025, 4, 4))).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_resource_lookup() {
        let registry = ResourceRegistry::new();
        assert_eq!(
            registry.utilization("ghost", d(2025, 4, 1)).unwrap_err(),
            AllocationError::UnknownResource("ghost".to_string())
        );
    }

    #[test]
    fn test_flow_events_ordered() {
        let mut resource = Resource::new("dev", 1.0);
        resource.record_arrival("t1", d(2025, 4, 1));
        resource.record_departure("t1", d(2025, 4, 5));

        assert_eq!(resource.flow_events.len(), 2);
        assert_eq!(resource.flow_events[0].kind, FlowKind::Arrival);
        assert_eq!(resource.flow_events[1].kind, FlowKind::Departure);
    }
}
