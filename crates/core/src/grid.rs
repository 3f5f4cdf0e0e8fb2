//! Host grid geometry and field storage
//!
//! The host CRM stores fields as `(k, j, i, icrm)` arrays: level, row, column
//! and CRM replica. The microphysics scheme works on flat columns instead,
//! indexed by `icol = i + nx * (j + ny * icrm)`, each holding `nzm` levels.
//! [`HostGrid::column_index`] and [`HostGrid::column_coords`] are the only
//! places that mapping is written down.

use crate::constants::Real;
use crate::error::{MicroError, MicroResult};

/// Dimensions of the host CRM grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostGrid {
    /// Columns per row
    pub nx: usize,
    /// Rows per CRM
    pub ny: usize,
    /// Model levels (cell centres)
    pub nzm: usize,
    /// Independent CRM replicas
    pub ncrms: usize,
}

impl HostGrid {
    /// Create grid dimensions.
    ///
    /// # Panics
    ///
    /// Panics if any dimension is zero
    #[must_use]
    pub fn new(nx: usize, ny: usize, nzm: usize, ncrms: usize) -> Self {
        assert!(
            nx > 0 && ny > 0 && nzm > 0 && ncrms > 0,
            "Grid dimensions must be positive"
        );
        Self { nx, ny, nzm, ncrms }
    }

    /// Number of flat microphysics columns
    #[must_use]
    pub const fn ncol(&self) -> usize {
        self.nx * self.ny * self.ncrms
    }

    /// Number of level interfaces
    #[must_use]
    pub const fn nz(&self) -> usize {
        self.nzm + 1
    }

    /// Number of host cells
    #[must_use]
    pub const fn ncells(&self) -> usize {
        self.nzm * self.ncol()
    }

    /// Flat column index of host position `(i, j, icrm)`
    #[inline]
    #[must_use]
    pub const fn column_index(&self, i: usize, j: usize, icrm: usize) -> usize {
        i + self.nx * (j + self.ny * icrm)
    }

    /// Host position `(i, j, icrm)` of a flat column index
    #[inline]
    #[must_use]
    pub const fn column_coords(&self, icol: usize) -> (usize, usize, usize) {
        let i = icol % self.nx;
        let j = (icol / self.nx) % self.ny;
        let icrm = (icol / self.nx) / self.ny;
        (i, j, icrm)
    }

    /// Shape of a cell field, `(nzm, ny, nx, ncrms)`
    #[must_use]
    pub const fn cell_shape(&self) -> [usize; 4] {
        [self.nzm, self.ny, self.nx, self.ncrms]
    }

    /// Shape of a per-level profile field, `(nzm, ncrms)`
    #[must_use]
    pub const fn level_shape(&self) -> [usize; 2] {
        [self.nzm, self.ncrms]
    }

    /// Shape of a surface field, `(ny, nx, ncrms)`
    #[must_use]
    pub const fn surface_shape(&self) -> [usize; 3] {
        [self.ny, self.nx, self.ncrms]
    }
}

/// Dense N-dimensional field in row-major order (last index fastest).
#[derive(Debug, Clone, PartialEq)]
pub struct Field<const N: usize> {
    /// Field values in row-major order
    pub data: Vec<Real>,
    shape: [usize; N],
}

/// Host field indexed `(k, j, i, icrm)`
pub type CellField = Field<4>;
/// Host profile indexed `(k, icrm)`
pub type LevelField = Field<2>;
/// Host surface field indexed `(j, i, icrm)`
pub type SurfaceField = Field<3>;

impl<const N: usize> Field<N> {
    /// Create a field initialized to zero
    #[must_use]
    pub fn new(shape: [usize; N]) -> Self {
        Self::with_value(shape, 0.0)
    }

    /// Create a field initialized to `value`
    #[must_use]
    pub fn with_value(shape: [usize; N], value: Real) -> Self {
        Self {
            data: vec![value; shape.iter().product()],
            shape,
        }
    }

    /// Wrap existing data.
    ///
    /// # Errors
    ///
    /// Returns `GridMismatch` if `data` does not match the shape
    pub fn from_vec(name: &'static str, shape: [usize; N], data: Vec<Real>) -> MicroResult<Self> {
        let expected = shape.iter().product();
        if data.len() != expected {
            return Err(MicroError::GridMismatch {
                field: name,
                expected,
                found: data.len(),
            });
        }
        Ok(Self { data, shape })
    }

    /// Field shape
    #[must_use]
    pub const fn shape(&self) -> [usize; N] {
        self.shape
    }

    /// Flat offset of a multi-index.
    ///
    /// # Panics
    ///
    /// Panics if any index is out of bounds
    #[inline]
    #[must_use]
    pub fn offset(&self, index: [usize; N]) -> usize {
        let mut flat = 0;
        for (axis, (&idx, &len)) in index.iter().zip(self.shape.iter()).enumerate() {
            assert!(idx < len, "Index {idx} out of bounds on axis {axis} (len {len})");
            flat = flat * len + idx;
        }
        flat
    }

    /// Value at a multi-index
    #[inline]
    #[must_use]
    pub fn get(&self, index: [usize; N]) -> Real {
        self.data[self.offset(index)]
    }

    /// Set the value at a multi-index
    #[inline]
    pub fn set(&mut self, index: [usize; N], value: Real) {
        let offset = self.offset(index);
        self.data[offset] = value;
    }

    /// Fill the entire field with a value
    pub fn fill(&mut self, value: Real) {
        self.data.fill(value);
    }

    /// Get reference to field data
    #[must_use]
    pub fn as_slice(&self) -> &[Real] {
        &self.data
    }

    /// Get mutable reference to field data
    pub fn as_mut_slice(&mut self) -> &mut [Real] {
        &mut self.data
    }
}

impl CellField {
    /// Cell field sized for a host grid, initialized to zero
    #[must_use]
    pub fn cells(grid: &HostGrid) -> Self {
        Self::new(grid.cell_shape())
    }
}

/// Decompose a flat cell offset into `(k, j, i, icrm)`.
#[inline]
#[must_use]
pub const fn cell_coords(grid: &HostGrid, offset: usize) -> (usize, usize, usize, usize) {
    let icrm = offset % grid.ncrms;
    let rest = offset / grid.ncrms;
    let i = rest % grid.nx;
    let rest = rest / grid.nx;
    let j = rest % grid.ny;
    let k = rest / grid.ny;
    (k, j, i, icrm)
}

/// Field in the scheme's column layout: `ncol` columns of `nlev` levels.
///
/// Each column's levels are contiguous, so columns can be handed out as
/// independent slices for parallel work.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnField {
    /// Values, column-major (`icol * nlev + k`)
    pub data: Vec<Real>,
    /// Number of columns
    pub ncol: usize,
    /// Levels per column
    pub nlev: usize,
}

impl ColumnField {
    /// Create a column field initialized to zero
    #[must_use]
    pub fn new(ncol: usize, nlev: usize) -> Self {
        Self::with_value(ncol, nlev, 0.0)
    }

    /// Create a column field initialized to `value`
    #[must_use]
    pub fn with_value(ncol: usize, nlev: usize, value: Real) -> Self {
        Self {
            data: vec![value; ncol * nlev],
            ncol,
            nlev,
        }
    }

    /// Column field shaped for a host grid
    #[must_use]
    pub fn for_grid(grid: &HostGrid) -> Self {
        Self::new(grid.ncol(), grid.nzm)
    }

    /// Value at `(icol, k)`
    #[inline]
    #[must_use]
    pub fn get(&self, icol: usize, k: usize) -> Real {
        assert!(
            icol < self.ncol && k < self.nlev,
            "Column index out of bounds"
        );
        self.data[icol * self.nlev + k]
    }

    /// Set the value at `(icol, k)`
    #[inline]
    pub fn set(&mut self, icol: usize, k: usize, value: Real) {
        assert!(
            icol < self.ncol && k < self.nlev,
            "Column index out of bounds"
        );
        self.data[icol * self.nlev + k] = value;
    }

    /// One column's levels
    #[must_use]
    pub fn column(&self, icol: usize) -> &[Real] {
        &self.data[icol * self.nlev..(icol + 1) * self.nlev]
    }

    /// Fill the entire field with a value
    pub fn fill(&mut self, value: Real) {
        self.data.fill(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_index_round_trips_every_column() {
        let grid = HostGrid::new(4, 3, 5, 2);
        let mut seen = vec![false; grid.ncol()];
        for icrm in 0..grid.ncrms {
            for j in 0..grid.ny {
                for i in 0..grid.nx {
                    let icol = grid.column_index(i, j, icrm);
                    assert!(!seen[icol], "column {icol} visited twice");
                    seen[icol] = true;
                    assert_eq!(grid.column_coords(icol), (i, j, icrm));
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_column_index_is_x_fastest() {
        let grid = HostGrid::new(4, 3, 5, 2);
        assert_eq!(grid.column_index(0, 0, 0), 0);
        assert_eq!(grid.column_index(1, 0, 0), 1);
        assert_eq!(grid.column_index(0, 1, 0), 4);
        assert_eq!(grid.column_index(0, 0, 1), 12);
        assert_eq!(grid.column_index(3, 2, 1), 23);
    }

    #[test]
    fn test_cell_coords_matches_offset() {
        let grid = HostGrid::new(3, 2, 4, 2);
        let field = CellField::cells(&grid);
        for offset in 0..grid.ncells() {
            let (k, j, i, icrm) = cell_coords(&grid, offset);
            assert_eq!(field.offset([k, j, i, icrm]), offset);
        }
    }

    #[test]
    fn test_field_get_set() {
        let mut field = Field::new([2, 3]);
        field.set([1, 2], 4.5);
        assert_eq!(field.get([1, 2]), 4.5);
        assert_eq!(field.data[5], 4.5);
        field.fill(1.0);
        assert!(field.data.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_field_from_vec_checks_length() {
        assert!(Field::from_vec("pres", [2, 2], vec![0.0; 4]).is_ok());
        let err = Field::from_vec("pres", [2, 2], vec![0.0; 3]).unwrap_err();
        assert!(err.to_string().contains("pres"));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_field_bounds_check() {
        let field = Field::new([2, 2]);
        let _ = field.get([2, 0]);
    }

    #[test]
    fn test_column_field_layout() {
        let mut field = ColumnField::new(3, 4);
        field.set(2, 1, 7.0);
        assert_eq!(field.data[9], 7.0);
        assert_eq!(field.column(2), &[0.0, 7.0, 0.0, 0.0]);
    }
}
