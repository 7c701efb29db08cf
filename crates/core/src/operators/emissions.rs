use super::{CellManipulator, CiSnapshot};
use crate::cell::Cell;
use crate::mechanism::Mechanism;
use crate::units::Seconds;

/// Manipulator 1: `Cf += emisFlux * dt` per species.
pub struct AddEmissions;

impl CellManipulator for AddEmissions {
    fn name(&self) -> &'static str {
        "add_emissions"
    }

    fn apply(&self, cell: &mut Cell, _ci: &CiSnapshot, mechanism: &dyn Mechanism, dt: Seconds) {
        mechanism.add_emis_flux(cell, dt);
    }
}
