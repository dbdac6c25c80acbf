// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer strings the other layers together for one goal
// (training or predicting) over a batch of units.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - Files are touched only through Layer 4 and 6 types
//   - Only workflow coordination

// (team, subject, algorithm) selection
pub mod scope;

// The training workflow
pub mod train_use_case;

// The prediction workflow
pub mod predict_use_case;

// Reloading pseudo-label exports
pub mod audit_use_case;

#[cfg(test)]
pub(crate) mod test_support;
