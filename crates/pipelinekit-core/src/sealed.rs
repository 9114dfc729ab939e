//! Internal trait used to control which public traits a downstream crate
//! is allowed to implement.
//!
//! Traits we may want to grow (new methods, new invariants) without a
//! breaking change require `: crate::sealed::Sealed` as a supertrait, so
//! callers cannot implement them directly. Tightening the blanket impl
//! below would restrict implementers further, but isn't needed today.

pub(crate) trait Sealed {}

impl<T: ?Sized> Sealed for T {}
