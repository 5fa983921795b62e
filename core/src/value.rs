//! The opaque payload type carried by `SVar`s, `Ref`s and exceptions.
//!
//! The interpreter is generic over whatever a program under test chooses
//! to put in its variables, so values are type-erased at this layer the
//! way a dynamically-typed interpreter would erase them: the program
//! itself is the only party that ever downcasts one back.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub struct Value(Rc<dyn Any>);

impl Value {
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Attempts to recover the concrete `T` without cloning the `Rc`'s
    /// contents. Falls back to `None` if another clone of this `Value` is
    /// still alive, since `Rc::try_unwrap` requires a unique reference.
    #[must_use]
    pub fn try_into_inner<T: Any>(self) -> Result<T, Self> {
        match Rc::downcast::<T>(self.0) {
            Ok(boxed) => Rc::try_unwrap(boxed).map_err(|rc| Self(rc)),
            Err(rc) => Err(Self(rc)),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value(..)")
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::new(())
    }
}
