use super::{CellManipulator, CiSnapshot};
use crate::cell::Cell;
use crate::mechanism::Mechanism;
use crate::units::Seconds;

/// Manipulator 7: chemistry. Delegates entirely to the
/// active [`Mechanism`], since the reactions themselves (and the
/// species they touch) are mechanism-specific.
pub struct Chemistry;

impl CellManipulator for Chemistry {
    fn name(&self) -> &'static str {
        "chemistry"
    }

    fn apply(&self, cell: &mut Cell, _ci: &CiSnapshot, mechanism: &dyn Mechanism, dt: Seconds) {
        mechanism.chemistry(cell, dt);
    }
}
