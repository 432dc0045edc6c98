use std::collections::BTreeMap;

use hcl::expr::{
    Expression, FuncCall, ObjectKey, TemplateExpr, Traversal, TraversalOperator, Variable,
};
use hcl::template::{Element, Template};

/// Outcome of partially evaluating an HCL expression.
///
/// Backend keys frequently reference values that only exist at `terraform
/// apply` time; those evaluate to `Unknown` instead of failing, and callers
/// skip them (usually with a diagnostic).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Value(String),
    Unknown,
}

impl Resolved {
    pub fn as_value(&self) -> Option<&str> {
        match self {
            Resolved::Value(s) => Some(s),
            Resolved::Unknown => None,
        }
    }
}

/// The fixed variable scope expressions are evaluated against.
///
/// Only three namespaces exist: `local.*`, `var.*`, and `path.module`.
/// Template placeholder bindings are injected as locals by discovery so that
/// keys like `"${local.service}/${local.region}/vpc/terraform.tfstate"`
/// resolve from the module's position in the tree.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    locals: BTreeMap<String, String>,
    vars: BTreeMap<String, String>,
    path_module: Option<String>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locals(locals: BTreeMap<String, String>) -> Self {
        Self {
            locals,
            ..Self::default()
        }
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.locals.insert(name.into(), value.into());
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn set_path_module(&mut self, value: impl Into<String>) {
        self.path_module = Some(value.into());
    }

    fn resolve(&self, namespace: &str, attr: &str) -> Resolved {
        let hit = match namespace {
            "local" => self.locals.get(attr),
            "var" => self.vars.get(attr),
            "path" if attr == "module" => return self.path_module(),
            _ => None,
        };

        match hit {
            Some(value) => Resolved::Value(value.clone()),
            None => Resolved::Unknown,
        }
    }

    fn path_module(&self) -> Resolved {
        match &self.path_module {
            Some(value) => Resolved::Value(value.clone()),
            None => Resolved::Unknown,
        }
    }
}

/// Evaluate an expression to a concrete string where the scope allows it.
///
/// Supported forms: string literals, numbers and bools (rendered via
/// Display), string templates, `local.*`/`var.*`/`path.module` traversals,
/// parenthesized expressions, and `lookup(map, key, default?)`. Everything
/// else is `Unknown`.
pub fn evaluate(expr: &Expression, scope: &Scope) -> Resolved {
    match expr {
        Expression::String(s) => Resolved::Value(s.clone()),
        Expression::Number(n) => Resolved::Value(n.to_string()),
        Expression::Bool(b) => Resolved::Value(b.to_string()),
        Expression::TemplateExpr(template) => evaluate_template(template, scope),
        Expression::Variable(variable) => evaluate_variable(variable),
        Expression::Traversal(traversal) => evaluate_traversal(traversal, scope),
        Expression::Parenthesis(inner) => evaluate(inner, scope),
        Expression::FuncCall(call) => evaluate_func_call(call, scope),
        _ => Resolved::Unknown,
    }
}

fn evaluate_template(template: &TemplateExpr, scope: &Scope) -> Resolved {
    let parsed = match Template::from_expr(template) {
        Ok(parsed) => parsed,
        Err(_) => return Resolved::Unknown,
    };

    let mut out = String::new();
    for element in parsed.elements() {
        match element {
            Element::Literal(text) => out.push_str(text),
            Element::Interpolation(interp) => match evaluate(&interp.expr, scope) {
                Resolved::Value(value) => out.push_str(&value),
                Resolved::Unknown => return Resolved::Unknown,
            },
            // %{ if }/%{ for } directives are beyond partial evaluation
            Element::Directive(_) => return Resolved::Unknown,
        }
    }

    Resolved::Value(out)
}

fn evaluate_variable(_variable: &Variable) -> Resolved {
    // A bare scope name (`local`, `var`) is never a string value
    Resolved::Unknown
}

fn evaluate_traversal(traversal: &Traversal, scope: &Scope) -> Resolved {
    let namespace = match &traversal.expr {
        Expression::Variable(variable) => variable.as_str(),
        _ => return Resolved::Unknown,
    };

    match traversal.operators.as_slice() {
        [TraversalOperator::GetAttr(attr)] => scope.resolve(namespace, attr.as_str()),
        _ => Resolved::Unknown,
    }
}

fn evaluate_func_call(call: &FuncCall, scope: &Scope) -> Resolved {
    if call.name.to_string() != "lookup" {
        return Resolved::Unknown;
    }

    let (map_expr, key_expr, default_expr) = match call.args.as_slice() {
        [map, key] => (map, key, None),
        [map, key, default] => (map, key, Some(default)),
        _ => return Resolved::Unknown,
    };

    let map = match map_expr {
        Expression::Object(map) => map,
        _ => return Resolved::Unknown,
    };

    let key = match evaluate(key_expr, scope) {
        Resolved::Value(key) => key,
        Resolved::Unknown => return Resolved::Unknown,
    };

    for (object_key, value) in map {
        let matches = match object_key {
            ObjectKey::Identifier(ident) => ident.as_str() == key,
            ObjectKey::Expression(expr) => evaluate(expr, scope).as_value() == Some(key.as_str()),
            _ => false,
        };
        if matches {
            return evaluate(value, scope);
        }
    }

    match default_expr {
        Some(default) => evaluate(default, scope),
        None => Resolved::Unknown,
    }
}
