/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Shared helpers for converting internal errors into public, loggable, reportable ones.
//!
//! Each component defines its own internal `Error` and public `ApiError` enums; this crate
//! supplies the glue (`GetErrorHandling`, `ErrorHandling`) so that conversion, logging, and
//! error-reporting stay consistent across components instead of being hand-rolled per-crate.

mod handling;
pub mod redact;
mod reporting;

pub use handling::{convert_log_report_error, ErrorHandling, ErrorReporting, GetErrorHandling};
pub use reporting::{
    report_breadcrumb, report_error_to_app, set_application_error_reporter,
    unset_application_error_reporter, ApplicationErrorReporter, ArcReporterAdapter,
    TestErrorReporter,
};

/// Initialize logging suitable for tests; safe to call repeatedly.
pub fn init_logging_for_tests() {
    #[cfg(feature = "log-logging")]
    {
        let _ = env_logger::builder().is_test(true).try_init();
    }
}
