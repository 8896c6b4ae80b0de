//! Service catalog and staff directory. Plain record storage — the conflict
//! resolver consults these, it never writes through them mid-admission.

use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Service, Staff};

pub struct ServiceCatalog {
    services: DashMap<Ulid, Service>,
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Returns false if a service with this id already exists.
    pub fn insert(&self, service: Service) -> bool {
        match self.services.entry(service.id) {
            dashmap::Entry::Occupied(_) => false,
            dashmap::Entry::Vacant(v) => {
                v.insert(service);
                true
            }
        }
    }

    pub fn get(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn get_active(&self, id: &Ulid) -> Option<Service> {
        self.get(id).filter(|s| s.active)
    }

    /// Returns false if the service is absent.
    pub fn retire(&self, id: &Ulid) -> bool {
        match self.services.get_mut(id) {
            Some(mut e) => {
                e.active = false;
                true
            }
            None => false,
        }
    }

    /// ULID order, i.e. creation order.
    pub fn list(&self) -> Vec<Service> {
        let mut all: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

pub struct StaffDirectory {
    staff: DashMap<Ulid, Staff>,
}

impl Default for StaffDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl StaffDirectory {
    pub fn new() -> Self {
        Self {
            staff: DashMap::new(),
        }
    }

    /// Returns false if a staff member with this id already exists.
    pub fn insert(&self, staff: Staff) -> bool {
        match self.staff.entry(staff.id) {
            dashmap::Entry::Occupied(_) => false,
            dashmap::Entry::Vacant(v) => {
                v.insert(staff);
                true
            }
        }
    }

    pub fn get(&self, id: &Ulid) -> Option<Staff> {
        self.staff.get(id).map(|e| e.value().clone())
    }

    pub fn get_active(&self, id: &Ulid) -> Option<Staff> {
        self.get(id).filter(|s| s.active)
    }

    /// Returns false if the staff member is absent.
    pub fn deactivate(&self, id: &Ulid) -> bool {
        match self.staff.get_mut(id) {
            Some(mut e) => {
                e.active = false;
                true
            }
            None => false,
        }
    }

    /// Active staff in ULID order, i.e. creation order. This is the scan
    /// order of the availability query engine.
    pub fn list_active(&self) -> Vec<Staff> {
        let mut active: Vec<Staff> = self
            .staff
            .iter()
            .filter(|e| e.value().active)
            .map(|e| e.value().clone())
            .collect();
        active.sort_by_key(|s| s.id);
        active
    }

    pub fn list(&self) -> Vec<Staff> {
        let mut all: Vec<Staff> = self.staff.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    pub fn len(&self) -> usize {
        self.staff.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staff.is_empty()
    }
}
