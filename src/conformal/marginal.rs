//! Marginal CP
//!
//! Split conformal interval with one symmetric width shared by every row.
use crate::conformal::quantile::conformal_quantile;
use crate::conformal::Intervals;
use crate::errors::ConformalError;
use log::info;

#[derive(Debug, Clone, PartialEq)]
pub struct MarginalConformal {
    pub alpha: f64,
    quantile: Option<f64>,
}

impl MarginalConformal {
    pub fn new(alpha: f64) -> Self {
        MarginalConformal { alpha, quantile: None }
    }

    pub fn set_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Store the conformal quantile of `|residuals|`.
    pub fn fit(&mut self, residuals: &[f64]) -> Result<(), ConformalError> {
        let q = conformal_quantile(residuals, self.alpha)?;
        info!("Marginal conformal half-width {} from {} residuals.", q, residuals.len());
        self.quantile = Some(q);
        Ok(())
    }

    /// Fitted half-width.
    pub fn half_width(&self) -> Result<f64, ConformalError> {
        self.quantile.ok_or(ConformalError::NotFitted("MarginalConformal"))
    }

    /// `(-q, q)` for each of `n_rows` rows.
    pub fn predict(&self, n_rows: usize) -> Result<Intervals, ConformalError> {
        let q = self.half_width()?;
        Ok(Intervals::symmetric(&vec![q; n_rows]))
    }
}
