use serde_json::Value;

/// A dense N-dimensional array of JSON values addressed by coordinate
/// tuple, row-major with the first dimension outermost. Zero dimensions is
/// a single cell, which is what plain-aggregate queries produce.
#[derive(Debug, Clone)]
pub struct Matrix {
    dims: Vec<usize>,
    cells: Vec<Value>,
}

impl Matrix {
    pub fn new(dims: Vec<usize>, fill: Value) -> Self {
        let len = dims.iter().product::<usize>().max(1);
        Self {
            dims,
            cells: vec![fill; len],
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    fn offset(&self, coord: &[usize]) -> Option<usize> {
        if coord.len() != self.dims.len() {
            return None;
        }
        let mut offset = 0;
        for (c, d) in coord.iter().zip(self.dims.iter()) {
            if c >= d {
                return None;
            }
            offset = offset * d + c;
        }
        Some(offset)
    }

    pub fn get(&self, coord: &[usize]) -> Option<&Value> {
        self.offset(coord).map(|i| &self.cells[i])
    }

    pub fn set(&mut self, coord: &[usize], value: Value) -> bool {
        match self.offset(coord) {
            Some(i) => {
                self.cells[i] = value;
                true
            }
            None => false,
        }
    }

    /// Nested-array JSON form; a 0-dimensional matrix collapses to its cell.
    pub fn into_json(self) -> Value {
        fn nest(dims: &[usize], cells: &mut std::vec::IntoIter<Value>) -> Value {
            match dims.split_first() {
                None => cells.next().unwrap_or(Value::Null),
                Some((n, rest)) => Value::Array((0..*n).map(|_| nest(rest, cells)).collect()),
            }
        }
        let mut cells = self.cells.into_iter();
        nest(&self.dims, &mut cells)
    }
}
