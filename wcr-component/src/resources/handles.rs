//! Own and borrow handles.
//!
//! An own handle holds the resource representation and tracks outstanding
//! lends; dropping it runs the destructor in the owning instance's context.
//! A borrow handle lends access without transfer and must be released before
//! its parent can be dropped or moved.

use log::trace;

use crate::prelude::*;
use crate::types::{RepKind, ResourceDtor, ResourceType};

/// The representation value carried by a resource handle
#[derive(Clone)]
pub enum HandleRep {
    /// A 32-bit integer representation (guest resources)
    U32(u32),
    /// An opaque host value
    Host(Rc<dyn Any>),
}

impl HandleRep {
    /// The u32 representation, or a handle misuse error
    pub fn as_u32(&self) -> Result<u32> {
        match self {
            HandleRep::U32(v) => Ok(*v),
            HandleRep::Host(_) => Err(Error::handle_misuse(
                "resource representation is a host value, not a u32",
            )),
        }
    }
}

impl Debug for HandleRep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleRep::U32(v) => write!(f, "HandleRep::U32({v})"),
            HandleRep::Host(_) => f.write_str("HandleRep::Host"),
        }
    }
}

/// An owning resource handle
#[derive(Debug)]
pub struct OwnedHandle {
    ty: Rc<ResourceType>,
    /// Cleared on drop; a cleared handle rejects every operation
    rep: RefCell<Option<HandleRep>>,
    num_lends: Cell<u32>,
}

impl OwnedHandle {
    /// Create an own handle, validating the representation kind
    pub fn new(ty: Rc<ResourceType>, rep: HandleRep) -> Result<Rc<Self>> {
        match (ty.rep(), &rep) {
            (RepKind::U32, HandleRep::U32(_)) | (RepKind::Host, HandleRep::Host(_)) => {}
            (expected, _) => {
                return Err(Error::handle_misuse(format!(
                    "representation does not match the resource's {expected:?} kind"
                )));
            }
        }
        Ok(Rc::new(Self {
            ty,
            rep: RefCell::new(Some(rep)),
            num_lends: Cell::new(0),
        }))
    }

    /// The handle's resource type
    pub fn ty(&self) -> &Rc<ResourceType> {
        &self.ty
    }

    /// The representation value; fails after drop
    pub fn resource(&self) -> Result<HandleRep> {
        self.rep
            .borrow()
            .clone()
            .ok_or_else(|| Error::handle_misuse("own handle used after drop"))
    }

    /// The u32 representation; fails after drop or for host resources
    pub fn rep_u32(&self) -> Result<u32> {
        self.resource()?.as_u32()
    }

    /// Whether the handle has been dropped
    pub fn is_dropped(&self) -> bool {
        self.rep.borrow().is_none()
    }

    /// Number of outstanding lends
    pub fn num_lends(&self) -> u32 {
        self.num_lends.get()
    }

    /// Lend the resource, producing a borrow handle.
    ///
    /// Increments this handle's lend count and the owning instance's borrow
    /// counter; both are released when the borrow is dropped.
    pub fn lend(self: &Rc<Self>) -> Result<Rc<BorrowedHandle>> {
        if self.is_dropped() {
            return Err(Error::handle_misuse("cannot borrow a dropped own handle"));
        }
        self.num_lends.set(self.num_lends.get() + 1);
        if let Some(owner) = self.ty.owner() {
            owner.adjust_borrow_count(1);
        }
        Ok(Rc::new(BorrowedHandle {
            ty: self.ty.clone(),
            parent: BorrowParent::Own(self.clone()),
            sub_lends: Cell::new(0),
            dropped: Cell::new(false),
        }))
    }

    /// Check the handle may transfer ownership: not dropped, no lends
    pub fn assert_transferable(&self) -> Result<()> {
        if self.is_dropped() {
            return Err(Error::handle_misuse("cannot move a dropped own handle"));
        }
        if self.num_lends.get() > 0 {
            return Err(Error::handle_misuse(format!(
                "cannot move an own handle with {} outstanding lends",
                self.num_lends.get()
            )));
        }
        Ok(())
    }

    /// Drop the handle, running the destructor on first drop.
    ///
    /// Idempotent. Rejects while lends are outstanding. The destructor runs
    /// in the owning instance's context, entering and exiting it when it is
    /// not the active one; destructor failures are fatal.
    pub fn drop_handle(&self) -> Result<()> {
        if self.is_dropped() {
            return Ok(());
        }
        if self.num_lends.get() > 0 {
            return Err(Error::handle_misuse(format!(
                "cannot drop an own handle with {} outstanding lends",
                self.num_lends.get()
            )));
        }
        let rep = self
            .rep
            .borrow_mut()
            .take()
            .ok_or_else(|| Error::handle_misuse("own handle used after drop"))?;
        let Some(dtor) = self.ty.dtor() else {
            return Ok(());
        };
        trace!("running resource destructor");
        let outcome = match dtor {
            ResourceDtor::Core(func) => {
                let rep = rep.as_u32()?;
                match self.ty.owner() {
                    Some(owner) if !owner.is_active() => {
                        owner.enter()?;
                        let result = func.call(&[CoreValue::I32(rep as i32)]);
                        owner.exit()?;
                        result.map(|_| ())
                    }
                    _ => func.call(&[CoreValue::I32(rep as i32)]).map(|_| ()),
                }
            }
            ResourceDtor::Host(callback) => callback(&rep),
        };
        outcome.map_err(|err| {
            Error::destructor_failed(format!("resource destructor failed: {err}"))
        })
    }
}

/// What a borrow handle was lent from
#[derive(Debug, Clone)]
pub enum BorrowParent {
    /// Lent from an own handle
    Own(Rc<OwnedHandle>),
    /// Sub-lent from another borrow
    Borrow(Rc<BorrowedHandle>),
}

/// A borrowed resource handle
#[derive(Debug)]
pub struct BorrowedHandle {
    ty: Rc<ResourceType>,
    parent: BorrowParent,
    sub_lends: Cell<u32>,
    dropped: Cell<bool>,
}

impl BorrowedHandle {
    /// The handle's resource type
    pub fn ty(&self) -> &Rc<ResourceType> {
        &self.ty
    }

    /// The representation value, read through the lending chain
    pub fn resource(&self) -> Result<HandleRep> {
        if self.dropped.get() {
            return Err(Error::handle_misuse("borrow handle used after drop"));
        }
        match &self.parent {
            BorrowParent::Own(own) => own.resource(),
            BorrowParent::Borrow(parent) => parent.resource(),
        }
    }

    /// The u32 representation
    pub fn rep_u32(&self) -> Result<u32> {
        self.resource()?.as_u32()
    }

    /// Whether the borrow has been released
    pub fn is_dropped(&self) -> bool {
        self.dropped.get()
    }

    /// Sub-lend the borrow
    pub fn lend(self: &Rc<Self>) -> Result<Rc<BorrowedHandle>> {
        if self.dropped.get() {
            return Err(Error::handle_misuse("cannot borrow a dropped borrow handle"));
        }
        self.sub_lends.set(self.sub_lends.get() + 1);
        if let Some(owner) = self.ty.owner() {
            owner.adjust_borrow_count(1);
        }
        Ok(Rc::new(BorrowedHandle {
            ty: self.ty.clone(),
            parent: BorrowParent::Borrow(self.clone()),
            sub_lends: Cell::new(0),
            dropped: Cell::new(false),
        }))
    }

    /// Release the borrow, rejecting while sub-lends are outstanding
    pub fn drop_handle(&self) -> Result<()> {
        if self.dropped.get() {
            return Err(Error::handle_misuse("borrow handle dropped twice"));
        }
        if self.sub_lends.get() > 0 {
            return Err(Error::handle_misuse(format!(
                "cannot drop a borrow with {} outstanding sub-lends",
                self.sub_lends.get()
            )));
        }
        self.dropped.set(true);
        match &self.parent {
            BorrowParent::Own(own) => {
                own.num_lends.set(own.num_lends.get().saturating_sub(1));
            }
            BorrowParent::Borrow(parent) => {
                parent.sub_lends.set(parent.sub_lends.get().saturating_sub(1));
            }
        }
        if let Some(owner) = self.ty.owner() {
            owner.adjust_borrow_count(-1);
        }
        Ok(())
    }
}

/// Entry of a per-instance lowered-handle table
#[derive(Debug, Clone)]
pub enum Handle {
    /// An own handle
    Own(Rc<OwnedHandle>),
    /// A borrow handle
    Borrow(Rc<BorrowedHandle>),
}

impl Handle {
    /// The handle's resource type
    pub fn ty(&self) -> &Rc<ResourceType> {
        match self {
            Handle::Own(h) => h.ty(),
            Handle::Borrow(h) => h.ty(),
        }
    }

    /// Whether this is a borrow
    pub fn is_borrowed(&self) -> bool {
        matches!(self, Handle::Borrow(_))
    }

    /// The representation value
    pub fn resource(&self) -> Result<HandleRep> {
        match self {
            Handle::Own(h) => h.resource(),
            Handle::Borrow(h) => h.resource(),
        }
    }

    /// Drop the handle with the kind's discipline
    pub fn drop_handle(&self) -> Result<()> {
        match self {
            Handle::Own(h) => h.drop_handle(),
            Handle::Borrow(h) => h.drop_handle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RepKind;

    fn own(rep: u32) -> Rc<OwnedHandle> {
        let ty = ResourceType::fresh(RepKind::U32);
        OwnedHandle::new(ty, HandleRep::U32(rep)).unwrap()
    }

    #[test]
    fn rep_kind_validated() {
        let ty = ResourceType::fresh(RepKind::U32);
        assert!(OwnedHandle::new(ty, HandleRep::Host(Rc::new(1u8))).is_err());
    }

    #[test]
    fn drop_is_idempotent() {
        let h = own(7);
        h.drop_handle().unwrap();
        h.drop_handle().unwrap();
        assert!(h.resource().is_err());
    }

    #[test]
    fn drop_with_lends_refused() {
        let h = own(7);
        let b = h.lend().unwrap();
        assert!(h.drop_handle().is_err());
        b.drop_handle().unwrap();
        h.drop_handle().unwrap();
    }

    #[test]
    fn borrow_reads_through_parent() {
        let h = own(42);
        let b = h.lend().unwrap();
        assert_eq!(b.rep_u32().unwrap(), 42);
        let sub = b.lend().unwrap();
        assert!(b.drop_handle().is_err());
        sub.drop_handle().unwrap();
        b.drop_handle().unwrap();
        assert!(b.drop_handle().is_err());
    }

    #[test]
    fn transfer_requires_no_lends() {
        let h = own(1);
        let b = h.lend().unwrap();
        assert!(h.assert_transferable().is_err());
        b.drop_handle().unwrap();
        assert!(h.assert_transferable().is_ok());
    }

    #[test]
    fn host_destructor_runs_once() {
        let ty = ResourceType::fresh(RepKind::Host);
        let ran = Rc::new(Cell::new(0u32));
        let ran_in_dtor = ran.clone();
        ty.set_dtor(crate::types::ResourceDtor::Host(Rc::new(move |_| {
            ran_in_dtor.set(ran_in_dtor.get() + 1);
            Ok(())
        })));
        let h = OwnedHandle::new(ty, HandleRep::Host(Rc::new("payload"))).unwrap();
        h.drop_handle().unwrap();
        h.drop_handle().unwrap();
        assert_eq!(ran.get(), 1);
    }
}
