//! Per-pass setting evaluation.
//!
//! An `Evaluator` answers "what is the value of key K in context C" for one
//! `LayerStack`. Every answer goes through the same two steps: find the most
//! specific layer that sets K, then evaluate that raw value. Formula references
//! re-enter the evaluator, so a referenced key is resolved exactly as if it
//! had been asked for directly.
//!
//! # Invariants
//!
//! 1. **Memoized:** each (key, context) is computed at most once per pass.
//! 2. **Terminates:** a reference back into the current evaluation path is a
//!    `DependencyCycle`, reported with the keys along the cycle.
//! 3. **Recoverable failures stay local:** type mismatches, failed formulas and
//!    unknown references become `PerSettingError`s with a best-effort value.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::definition_graph::{Contribution, ExpandedEntry};
use crate::document::{Category, Context, RawValue};
use crate::error::{Constraint, PerSettingError, ResolveError, SettingErrorKind};
use crate::formula::analyze::referenced_keys;
use crate::formula::eval::{evaluate, EvalError, SettingLookup};
use crate::resolve::{Schema, SourceRef};
use crate::stack::{Layer, LayerStack};
use crate::value::{SettingType, Value};

type SettingId = (String, Context);

/// Cached outcome for one (key, context).
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
    pub value: Value,
    pub winner: Option<SourceRef>,
    /// Direct references made while evaluating, in first-use order.
    pub dependencies: Vec<(String, Context)>,
}

struct Located<'s> {
    layer: &'s Layer,
    contribution: &'s Contribution,
}

pub struct Evaluator<'s> {
    stack: &'s LayerStack,
    schema: &'s Schema,
    cache: FxHashMap<SettingId, Evaluated>,
    /// Current evaluation path, for cycle detection.
    path: Vec<SettingId>,
    on_path: FxHashSet<SettingId>,
    /// One frame of recorded references per setting being evaluated.
    frames: Vec<Vec<SettingId>>,
    /// Context for lookups made outside any setting (constraint formulas).
    scope: Context,
    errors: Vec<PerSettingError>,
    seen_errors: FxHashSet<PerSettingError>,
}

impl<'s> Evaluator<'s> {
    pub fn new(stack: &'s LayerStack, schema: &'s Schema) -> Self {
        Self {
            stack,
            schema,
            cache: FxHashMap::default(),
            path: Vec::new(),
            on_path: FxHashSet::default(),
            frames: Vec::new(),
            scope: Context::Global,
            errors: Vec::new(),
            seen_errors: FxHashSet::default(),
        }
    }

    /// Concrete value of `key` in `context`.
    pub fn evaluate(&mut self, key: &str, context: Context) -> Result<Value, ResolveError> {
        Ok(self.evaluated(key, context)?.value)
    }

    /// Full outcome (value, winner, references) of `key` in `context`.
    pub fn evaluated(&mut self, key: &str, context: Context) -> Result<Evaluated, ResolveError> {
        let context = self.effective_context(key, context);
        let id = (key.to_string(), context);
        if let Some(hit) = self.cache.get(&id) {
            return Ok(hit.clone());
        }

        if self.on_path.contains(&id) {
            let start = self.path.iter().position(|p| *p == id).unwrap_or(0);
            let keys = self.path[start..].iter().map(|(k, _)| k.clone()).collect();
            return Err(ResolveError::DependencyCycle { keys, context });
        }

        self.path.push(id.clone());
        self.on_path.insert(id.clone());
        self.frames.push(Vec::new());

        let computed = self.compute(key, context);

        let dependencies = self.frames.pop().unwrap_or_default();
        self.path.pop();
        self.on_path.remove(&id);

        let (value, winner) = computed?;
        let evaluated = Evaluated {
            value,
            winner,
            dependencies,
        };
        self.cache.insert(id, evaluated.clone());
        Ok(evaluated)
    }

    /// Previously computed outcome, if any.
    pub fn cached(&self, key: &str, context: Context) -> Option<&Evaluated> {
        let context = self.effective_context(key, context);
        self.cache.get(&(key.to_string(), context))
    }

    /// Context a key actually resolves in. Keys not settable per extruder,
    /// and extruders the stack does not have, read the shared layers.
    pub fn effective_context(&self, key: &str, context: Context) -> Context {
        match context {
            Context::Extruder(position)
                if self.stack.has_extruder(position) && self.schema.per_extruder(key) =>
            {
                context
            }
            _ => Context::Global,
        }
    }

    pub fn errors(&self) -> &[PerSettingError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<PerSettingError> {
        self.errors
    }

    /// Record a per-setting error once.
    pub fn record(&mut self, key: &str, context: Context, kind: SettingErrorKind) {
        let err = PerSettingError::new(key, context, kind);
        if self.seen_errors.insert(err.clone()) {
            log::warn!("{}", err);
            self.errors.push(err);
        }
    }

    /// Evaluate the constraints of an already resolved setting.
    ///
    /// Returns whether the setting is enabled. With `check` unset, only
    /// `enabled` is evaluated and nothing is reported.
    pub fn check_constraints(
        &mut self,
        key: &str,
        context: Context,
        value: &Value,
        winner: Option<&SourceRef>,
        check: bool,
    ) -> Result<bool, ResolveError> {
        let context = self.effective_context(key, context);
        let previous_scope = std::mem::replace(&mut self.scope, context);
        let result = self.constraints(key, context, value, winner, check);
        self.scope = previous_scope;
        result
    }

    fn constraints(
        &mut self,
        key: &str,
        context: Context,
        value: &Value,
        winner: Option<&SourceRef>,
        check: bool,
    ) -> Result<bool, ResolveError> {
        let enabled = match self.property(key, context, |e| e.enabled.as_ref()) {
            Some(raw) => match self.constraint_value(key, context, Constraint::Enabled, raw, check)? {
                Some(flag) => flag.truthy(),
                None => true,
            },
            None => true,
        };

        if !check {
            return Ok(enabled);
        }

        // Disabled settings may only carry the definition's own value
        if let Some(source) = winner.filter(|w| w.category != Category::Definition) {
            if !enabled {
                self.record(
                    key,
                    context,
                    SettingErrorKind::ConstraintViolation {
                        constraint: Constraint::Enabled,
                        detail: format!("set by {} '{}' while disabled", source.category, source.document),
                    },
                );
            }
        }

        // Bounds only apply to numbers
        if !value.is_numeric() {
            return Ok(enabled);
        }
        let Ok(actual) = value.to_number() else {
            return Ok(enabled);
        };

        for constraint in [Constraint::Minimum, Constraint::Maximum] {
            let raw = match constraint {
                Constraint::Minimum => self.property(key, context, |e| e.minimum.as_ref()),
                _ => self.property(key, context, |e| e.maximum.as_ref()),
            };
            let Some(raw) = raw else { continue };
            let Some(bound) = self.constraint_value(key, context, constraint, raw, true)? else {
                continue;
            };
            let bound = match bound.to_number() {
                Ok(bound) => bound,
                Err(message) => {
                    self.record(
                        key,
                        context,
                        SettingErrorKind::EvaluationFailed {
                            message: format!("{}: {}", constraint, message),
                        },
                    );
                    continue;
                }
            };
            let violated = match constraint {
                Constraint::Minimum => actual < bound,
                _ => actual > bound,
            };
            if violated {
                let relation = if constraint == Constraint::Minimum { "below" } else { "above" };
                self.record(
                    key,
                    context,
                    SettingErrorKind::ConstraintViolation {
                        constraint,
                        detail: format!("{} is {} {}", value, relation, bound),
                    },
                );
            }
        }

        Ok(enabled)
    }

    /// Evaluate one constraint property. Recoverable failures are recorded
    /// (when `report` is set) and yield `None`.
    fn constraint_value(
        &mut self,
        key: &str,
        context: Context,
        constraint: Constraint,
        raw: &RawValue,
        report: bool,
    ) -> Result<Option<Value>, ResolveError> {
        match self.eval_raw(raw) {
            Ok(value) => Ok(Some(value)),
            Err(EvalError::Structural(err)) => Err(err),
            Err(EvalError::Unknown(dependency)) => {
                if report {
                    self.record(key, context, SettingErrorKind::UnknownDependency { dependency });
                }
                Ok(None)
            }
            Err(EvalError::Failed(message)) => {
                if report {
                    self.record(
                        key,
                        context,
                        SettingErrorKind::EvaluationFailed {
                            message: format!("{}: {}", constraint, message),
                        },
                    );
                }
                Ok(None)
            }
        }
    }

    fn eval_raw(&mut self, raw: &RawValue) -> Result<Value, EvalError> {
        match raw {
            RawValue::Literal(value) => Ok(value.clone()),
            RawValue::Expression(formula) => evaluate(&formula.expr, self),
            RawValue::Invalid { source, message } => Err(EvalError::Failed(format!(
                "invalid formula '{}': {}",
                source, message
            ))),
        }
    }

    // -------------------------------------------------------------------------
    // Winner lookup and evaluation
    // -------------------------------------------------------------------------

    /// Most specific layer setting a value for `key`.
    fn locate(&self, key: &str, context: Context) -> Option<Located<'s>> {
        let stack: &'s LayerStack = self.stack;
        stack.layers_for(context).rev().find_map(|layer| {
            layer
                .document
                .get(key)
                .and_then(|entry| entry.value.as_ref())
                .map(|contribution| Located { layer, contribution })
        })
    }

    /// Nearest layer providing a property of `key`.
    fn property<F>(&self, key: &str, context: Context, pick: F) -> Option<&'s RawValue>
    where
        F: Fn(&'s ExpandedEntry) -> Option<&'s RawValue>,
    {
        let stack: &'s LayerStack = self.stack;
        stack
            .layers_for(context)
            .rev()
            .filter_map(|layer| layer.document.get(key))
            .find_map(pick)
    }

    fn compute(&mut self, key: &str, context: Context) -> Result<(Value, Option<SourceRef>), ResolveError> {
        let schema: &'s Schema = self.schema;
        let setting_type = schema.setting_type(key);
        let options = schema.options(key);

        let Some(located) = self.locate(key, context) else {
            self.record(key, context, SettingErrorKind::NoValue);
            return Ok((setting_type.zero_value(), None));
        };
        let winner = SourceRef {
            category: located.layer.category,
            context: located.layer.context,
            document: located.contribution.document.clone(),
        };

        let computed = match &located.contribution.raw {
            RawValue::Literal(value) => value.clone(),
            RawValue::Invalid { source, message } => {
                self.record(
                    key,
                    context,
                    SettingErrorKind::InvalidExpression {
                        expression: source.clone(),
                        message: message.clone(),
                    },
                );
                return Ok((self.fallback(key, context, setting_type, options), Some(winner)));
            }
            RawValue::Expression(formula) => {
                for dependency in referenced_keys(&formula.expr) {
                    if !self.schema.contains(&dependency) {
                        self.record(key, context, SettingErrorKind::UnknownDependency { dependency });
                    }
                }
                match evaluate(&formula.expr, self) {
                    Ok(value) => value,
                    Err(EvalError::Structural(err)) => return Err(err),
                    Err(EvalError::Unknown(dependency)) => {
                        self.record(key, context, SettingErrorKind::UnknownDependency { dependency });
                        return Ok((self.fallback(key, context, setting_type, options), Some(winner)));
                    }
                    Err(EvalError::Failed(message)) => {
                        self.record(key, context, SettingErrorKind::EvaluationFailed { message });
                        return Ok((self.fallback(key, context, setting_type, options), Some(winner)));
                    }
                }
            }
        };

        match setting_type.coerce(&computed, options) {
            Ok(value) => Ok((value, Some(winner))),
            Err(found) => {
                self.record(
                    key,
                    context,
                    SettingErrorKind::TypeMismatch {
                        expected: setting_type,
                        found,
                    },
                );
                // Report what the layer actually set
                Ok((computed, Some(winner)))
            }
        }
    }

    /// Best-effort value when the winner cannot be evaluated: the winner's
    /// declared default, else the most specific usable literal beneath it,
    /// else the type's zero value.
    fn fallback(&self, key: &str, context: Context, setting_type: SettingType, options: &[String]) -> Value {
        let stack: &'s LayerStack = self.stack;
        let mut candidates = stack
            .layers_for(context)
            .rev()
            .filter_map(|layer| layer.document.get(key))
            .flat_map(|entry| entry.contributions().rev());

        // The first contribution is the winner itself; only its default counts
        let winner_default = candidates.next().and_then(|winner| winner.fallback.clone());
        winner_default
            .into_iter()
            .chain(candidates.flat_map(|c| c.raw.as_literal().cloned().into_iter().chain(c.fallback.clone())))
            .find_map(|value| setting_type.coerce(&value, options).ok())
            .unwrap_or_else(|| setting_type.zero_value())
    }

    fn current_frame(&mut self) -> Option<&mut Vec<SettingId>> {
        self.frames.last_mut()
    }
}

impl SettingLookup for Evaluator<'_> {
    fn value_of(&mut self, key: &str) -> Result<Value, EvalError> {
        let context = self.current_context();
        self.value_in(key, context)
    }

    fn value_in(&mut self, key: &str, context: Context) -> Result<Value, EvalError> {
        if !self.schema.contains(key) {
            return Err(EvalError::Unknown(key.to_string()));
        }
        let id = (key.to_string(), self.effective_context(key, context));
        if let Some(frame) = self.current_frame() {
            if !frame.contains(&id) {
                frame.push(id.clone());
            }
        }
        Ok(self.evaluate(&id.0, id.1)?)
    }

    fn extruder_positions(&self) -> Vec<u32> {
        self.stack.extruder_positions()
    }

    fn current_context(&self) -> Context {
        self.path.last().map(|(_, context)| *context).unwrap_or(self.scope)
    }
}
