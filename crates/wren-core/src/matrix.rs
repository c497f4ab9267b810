use crate::context::EmitterContext;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::functions;
use crate::layout::MemoryLayout;
use crate::literal::Literal;
use crate::ops::BinaryOp;
use crate::scalar::Scalar;
use crate::value::Value;
use crate::vector::{constant_index, Vector};

// Matrix — Rank-2 view over a Value
//
// Logical dimension 0 is rows, 1 is columns, regardless of the physical
// order the layout stores them in. `row` and `column` produce vectors that
// alias the matrix: they offset the base to the first element of the slice
// and keep the increment of the surviving dimension (stride 1 for a row of
// a row-major matrix, stride `columns` for its column).

#[derive(Debug, Clone)]
pub struct Matrix {
    value: Value,
    dtype: DType,
    rows: usize,
    columns: usize,
}

impl Matrix {
    pub fn new(value: Value) -> Result<Self> {
        let layout = value.check_ready()?;
        if layout.rank() != 2 {
            return Err(Error::invalid_argument(format!(
                "matrix requires a rank-2 value, got rank {}",
                layout.rank()
            )));
        }
        let rows = layout.logical_active_size(0)?;
        let columns = layout.logical_active_size(1)?;
        let dtype = value.dtype()?;
        Ok(Matrix {
            value,
            dtype,
            rows,
            columns,
        })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    fn check_constant(ctx: &impl EmitterContext, index: &Scalar, len: usize) -> Result<()> {
        if let Some(lit) = index.known(ctx) {
            let i = constant_index(lit)?;
            if i >= len {
                return Err(Error::IndexOutOfRange { index: i, len });
            }
        }
        Ok(())
    }

    pub fn at<C: EmitterContext>(
        &self,
        ctx: &mut C,
        row: impl Into<Scalar>,
        column: impl Into<Scalar>,
    ) -> Result<Scalar> {
        let (row, column) = (row.into(), column.into());
        Matrix::check_constant(ctx, &row, self.rows)?;
        Matrix::check_constant(ctx, &column, self.columns)?;
        functions::element(ctx, &self.value, &[row, column])
    }

    /// Row `index` as a vector aliasing this matrix.
    pub fn row<C: EmitterContext>(&self, ctx: &mut C, index: impl Into<Scalar>) -> Result<Vector> {
        let index = index.into();
        Matrix::check_constant(ctx, &index, self.rows)?;
        let layout = self.value.layout()?;
        let sliced = layout.slice_layout(layout.physical_dimension(0)?)?;
        let base = ctx.offset(&self.value, &[index, Scalar::from(0usize)])?;
        Vector::new(base.with_layout(sliced)?)
    }

    /// Column `index` as a vector aliasing this matrix.
    pub fn column<C: EmitterContext>(&self, ctx: &mut C, index: impl Into<Scalar>) -> Result<Vector> {
        let index = index.into();
        Matrix::check_constant(ctx, &index, self.columns)?;
        let layout = self.value.layout()?;
        let sliced = layout.slice_layout(layout.physical_dimension(1)?)?;
        let base = ctx.offset(&self.value, &[Scalar::from(0usize), index])?;
        Vector::new(base.with_layout(sliced)?)
    }

    /// The `rows × columns` block whose top-left element is (`row`, `column`).
    /// Both extents are checked.
    pub fn sub_matrix<C: EmitterContext>(
        &self,
        ctx: &mut C,
        row: usize,
        column: usize,
        rows: usize,
        columns: usize,
    ) -> Result<Matrix> {
        if row + rows > self.rows {
            return Err(Error::IndexOutOfRange {
                index: row + rows,
                len: self.rows,
            });
        }
        if column + columns > self.columns {
            return Err(Error::IndexOutOfRange {
                index: column + columns,
                len: self.columns,
            });
        }
        let layout = self.value.layout()?.sub_layout(&[rows, columns])?;
        if rows == 0 || columns == 0 {
            return Matrix::new(self.value.clone().with_layout(layout)?);
        }
        let base = ctx.offset(&self.value, &[Scalar::from(row), Scalar::from(column)])?;
        Matrix::new(base.with_layout(layout)?)
    }

    pub fn copy<C: EmitterContext>(&self, ctx: &mut C) -> Result<Matrix> {
        Matrix::new(functions::copy(ctx, &self.value)?)
    }

    pub fn assign<C: EmitterContext>(&self, ctx: &mut C, src: &Matrix) -> Result<()> {
        functions::assign(ctx, &self.value, &src.value)
    }

    pub fn add_assign<C: EmitterContext>(&self, ctx: &mut C, rhs: &Matrix) -> Result<()> {
        functions::elementwise(ctx, &self.value, &rhs.value, BinaryOp::Add)
    }

    pub fn sub_assign<C: EmitterContext>(&self, ctx: &mut C, rhs: &Matrix) -> Result<()> {
        functions::elementwise(ctx, &self.value, &rhs.value, BinaryOp::Sub)
    }

    pub fn mul_assign<C: EmitterContext>(&self, ctx: &mut C, rhs: &Matrix) -> Result<()> {
        functions::elementwise(ctx, &self.value, &rhs.value, BinaryOp::Mul)
    }

    pub fn div_assign<C: EmitterContext>(&self, ctx: &mut C, rhs: &Matrix) -> Result<()> {
        functions::elementwise(ctx, &self.value, &rhs.value, BinaryOp::Div)
    }

    pub fn add_assign_scalar<C: EmitterContext>(&self, ctx: &mut C, s: &Scalar) -> Result<()> {
        functions::elementwise_scalar(ctx, &self.value, s, BinaryOp::Add)
    }

    pub fn mul_assign_scalar<C: EmitterContext>(&self, ctx: &mut C, s: &Scalar) -> Result<()> {
        functions::elementwise_scalar(ctx, &self.value, s, BinaryOp::Mul)
    }

    pub fn add<C: EmitterContext>(&self, ctx: &mut C, rhs: &Matrix) -> Result<Matrix> {
        functions::check_compatible(&self.value, &rhs.value)?;
        let out = self.copy(ctx)?;
        out.add_assign(ctx, rhs)?;
        Ok(out)
    }

    /// `y = self × x`.
    pub fn gemv<C: EmitterContext>(&self, ctx: &mut C, x: &Vector, y: &Vector) -> Result<()> {
        if x.size() != self.columns || y.size() != self.rows {
            return Err(Error::SizeMismatch {
                expected: vec![self.rows, self.columns],
                got: vec![y.size(), x.size()],
            });
        }
        if x.dtype() != self.dtype {
            return Err(Error::dtype_mismatch(self.dtype, x.dtype()));
        }
        if y.dtype() != self.dtype {
            return Err(Error::dtype_mismatch(self.dtype, y.dtype()));
        }
        ctx.for_range(0, self.rows, 1, |ctx, i| {
            let row = self.row(ctx, i.clone())?;
            let d = row.dot(ctx, x)?;
            y.at(ctx, i)?.assign(ctx, &d)
        })
    }

    /// Compact allocated matrix of the given element type.
    pub fn allocate<C: EmitterContext>(ctx: &mut C, dtype: DType, rows: usize, columns: usize) -> Result<Matrix> {
        Matrix::new(ctx.allocate(dtype, MemoryLayout::new(&[rows, columns]))?)
    }

    /// Host matrix from row-major data.
    pub fn from_rows(dtype: DType, rows: usize, columns: usize, data: &[f64]) -> Result<Matrix> {
        if data.len() != rows * columns {
            return Err(Error::SizeMismatch {
                expected: vec![rows, columns],
                got: vec![data.len()],
            });
        }
        Matrix::new(Value::from_f64(dtype, data, MemoryLayout::new(&[rows, columns]))?)
    }

    pub fn get(&self, row: usize, column: usize) -> Result<Literal> {
        self.value.get(&[row, column])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ComputeContext;

    fn m23() -> Matrix {
        Matrix::from_rows(DType::F32, 2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap()
    }

    #[test]
    fn test_row_and_column() {
        let mut ctx = ComputeContext::new();
        let m = m23();
        let r = m.row(&mut ctx, 1usize).unwrap();
        assert_eq!(r.value().to_vec::<f32>().unwrap(), vec![4.0, 5.0, 6.0]);
        let c = m.column(&mut ctx, 2usize).unwrap();
        assert_eq!(c.increment(), 3);
        assert_eq!(c.value().to_vec::<f32>().unwrap(), vec![3.0, 6.0]);
        assert!(m.row(&mut ctx, 2usize).is_err());
    }

    #[test]
    fn test_column_major_row() {
        let mut ctx = ComputeContext::new();
        // logical [[1, 2, 3], [4, 5, 6]] stored column by column
        let v = Value::wrap(
            vec![1.0f32, 4.0, 2.0, 5.0, 3.0, 6.0],
            MemoryLayout::column_major(2, 3),
        )
        .unwrap();
        let m = Matrix::new(v).unwrap();
        let r = m.row(&mut ctx, 0usize).unwrap();
        assert_eq!(r.increment(), 2);
        assert_eq!(r.value().to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_sub_matrix_checks_both_dims() {
        let mut ctx = ComputeContext::new();
        let m = m23();
        let s = m.sub_matrix(&mut ctx, 0, 1, 2, 2).unwrap();
        assert_eq!(s.value().to_vec::<f32>().unwrap(), vec![2.0, 3.0, 5.0, 6.0]);
        // rows fit but columns do not
        assert!(matches!(
            m.sub_matrix(&mut ctx, 0, 2, 1, 2),
            Err(Error::IndexOutOfRange { .. })
        ));
        let empty = m.sub_matrix(&mut ctx, 2, 0, 0, 3).unwrap();
        assert_eq!(empty.rows(), 0);
    }

    #[test]
    fn test_empty_views_at_far_end() {
        let mut ctx = ComputeContext::new();
        let m = Matrix::from_rows(DType::F64, 3, 4, &[0.0; 12]).unwrap();
        let last = m.column(&mut ctx, 3usize).unwrap();
        let empty = last.sub_vector(&mut ctx, 3usize, 0).unwrap();
        assert_eq!(empty.size(), 0);
        assert!(empty.value().to_f64_vec().unwrap().is_empty());
        let corner = m.sub_matrix(&mut ctx, 3, 4, 0, 0).unwrap();
        assert_eq!((corner.rows(), corner.columns()), (0, 0));
        assert!(corner.value().to_f64_vec().unwrap().is_empty());
        assert!(matches!(
            m.sub_matrix(&mut ctx, 3, 5, 0, 0),
            Err(Error::IndexOutOfRange { index: 5, len: 4 })
        ));
    }

    #[test]
    fn test_negative_index_reported() {
        let mut ctx = ComputeContext::new();
        let m = m23();
        let err = m.row(&mut ctx, Scalar::constant(-2i64)).unwrap_err();
        assert!(err.to_string().contains("negative index -2"), "{}", err);
        let v = m.row(&mut ctx, 0usize).unwrap();
        assert!(matches!(
            v.at(&mut ctx, Scalar::constant(-1i64)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_gemv() {
        let mut ctx = ComputeContext::new();
        let m = m23();
        let x = Vector::new(Value::from_slice(&[1.0f32, 0.0, -1.0])).unwrap();
        let y = Vector::new(Value::allocate(DType::F32, MemoryLayout::new(&[2]))).unwrap();
        m.gemv(&mut ctx, &x, &y).unwrap();
        assert_eq!(y.value().to_vec::<f32>().unwrap(), vec![-2.0, -2.0]);
    }

    #[test]
    fn test_matrix_mismatch() {
        let mut ctx = ComputeContext::new();
        let a = m23();
        let b = Matrix::from_rows(DType::F32, 3, 2, &[0.0; 6]).unwrap();
        assert!(matches!(
            a.add_assign(&mut ctx, &b),
            Err(Error::SizeMismatch { .. })
        ));
    }
}
