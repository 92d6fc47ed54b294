//! Script validation in an embedded JavaScript engine.
//!
//! Scripts see two read-only globals, `status` and `body`. A script passes
//! when its completion value is truthy, or, if it defines a global
//! `validate` function, when `validate(status, body)` returns truthy.
//!
//! The engine is created without any host bindings: no console, timers,
//! network, filesystem or process access.

use std::time::Duration;

use boa_engine::property::Attribute;
use boa_engine::{Context, JsError, JsString, JsValue, Source, js_string};
use tracing::debug;

use crate::checker::ProbeResponse;
use crate::error::ValidationError;

/// Execution bounds for one script evaluation
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// Wall-clock limit, independent of the network timeout
    pub timeout: Duration,
    /// Engine-level cap so runaway loops end even after the timeout fired
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            loop_iteration_limit: 10_000_000,
            recursion_limit: 512,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    limits: SandboxLimits,
}

impl ScriptSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    /// Evaluate `script` against a response on the blocking pool.
    pub async fn validate(
        &self,
        script: &str,
        response: &ProbeResponse,
    ) -> Result<(), ValidationError> {
        if script.trim().is_empty() {
            return Err(ValidationError::Configuration("empty validation script".to_string()));
        }

        let body = response.body_text()?.to_string();
        let script = script.to_string();
        let status = response.status;
        let limits = self.limits.clone();

        let evaluation =
            tokio::task::spawn_blocking(move || evaluate(&script, status, &body, &limits));

        match tokio::time::timeout(self.limits.timeout, evaluation).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(join_error)) => {
                Err(ValidationError::Validator(format!("script evaluation aborted: {join_error}")))
            }
            Err(_) => Err(ValidationError::Validator(format!(
                "script timed out after {} ms",
                self.limits.timeout.as_millis()
            ))),
        }
    }
}

fn evaluate(
    script: &str,
    status: u16,
    body: &str,
    limits: &SandboxLimits,
) -> Result<(), ValidationError> {
    let mut context = Context::default();
    context.runtime_limits_mut().set_loop_iteration_limit(limits.loop_iteration_limit);
    context.runtime_limits_mut().set_recursion_limit(limits.recursion_limit);

    let status = JsValue::from(i32::from(status));
    let body = JsValue::from(JsString::from(body));
    let read_only = Attribute::READONLY | Attribute::NON_ENUMERABLE | Attribute::PERMANENT;

    context
        .register_global_property(js_string!("status"), status.clone(), read_only)
        .map_err(script_error)?;
    context
        .register_global_property(js_string!("body"), body.clone(), read_only)
        .map_err(script_error)?;

    let completion = context.eval(Source::from_bytes(script)).map_err(script_error)?;

    let validate_fn =
        context.global_object().get(js_string!("validate"), &mut context).map_err(script_error)?;
    let verdict = match validate_fn.as_callable() {
        Some(function) => function
            .call(&JsValue::undefined(), &[status, body], &mut context)
            .map_err(script_error)?,
        None => completion,
    };

    if verdict.to_boolean() {
        Ok(())
    } else {
        let shown = verdict.display().to_string();
        debug!(verdict = %shown, "validation script returned a falsy value");
        Err(ValidationError::Validator(format!("script returned {shown}")))
    }
}

fn script_error(error: JsError) -> ValidationError {
    ValidationError::Validator(format!("script error: {error}"))
}
