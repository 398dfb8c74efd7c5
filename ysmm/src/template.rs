//! Kernel source templates.
//!
//! Templates are `OpenCL` C with two kinds of tags, `{{ name }}` is replaced
//! by the value of `name` and `{% if name %} .. {% else %} .. {% endif %}`
//! keeps one of the branches depending on whether `name` is nonzero.

use std::{collections::BTreeMap, fmt::Write};

use crate::{
    backend::OpenCLStatus,
    error::{BackendError, ErrorStatus},
};

/// Scalar substituted into template
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemplateValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl TemplateValue {
    const fn is_truthy(self) -> bool {
        match self {
            TemplateValue::Int(x) => x != 0,
            TemplateValue::Float(x) => x != 0.0,
            TemplateValue::Bool(x) => x,
        }
    }
}

impl std::fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateValue::Int(x) => write!(f, "{x}"),
            // Shortest representation which parses back to the same value,
            // always valid C literal when followed by `f`
            TemplateValue::Float(x) => write!(f, "{x:?}"),
            TemplateValue::Bool(x) => write!(f, "{}", i32::from(*x)),
        }
    }
}

impl From<i64> for TemplateValue {
    fn from(value: i64) -> Self {
        TemplateValue::Int(value)
    }
}

impl From<usize> for TemplateValue {
    fn from(value: usize) -> Self {
        TemplateValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for TemplateValue {
    fn from(value: f64) -> Self {
        TemplateValue::Float(value)
    }
}

impl From<bool> for TemplateValue {
    fn from(value: bool) -> Self {
        TemplateValue::Bool(value)
    }
}

/// Named template parameters, ordered by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateArgs {
    values: BTreeMap<String, TemplateValue>,
}

impl TemplateArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<TemplateValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<TemplateValue> {
        self.values.get(name).copied()
    }

    /// Deterministic `name=value;` serialization used as cache key
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut res = String::new();
        for (name, value) in &self.values {
            let _ = write!(res, "{name}={value};");
        }
        res
    }
}

fn render_error(msg: String) -> BackendError {
    BackendError::new(ErrorStatus::KernelCompilation, OpenCLStatus::CL_BUILD_PROGRAM_FAILURE, msg)
}

fn next_tag(s: &str) -> Option<usize> {
    s.match_indices('{')
        .map(|(i, _)| i)
        .find(|&i| matches!(s.as_bytes().get(i + 1), Some(b'{' | b'%')))
}

/// Renders template, referencing unknown parameter or malformed tags is an error
pub fn render(template: &str, args: &TemplateArgs) -> Result<String, BackendError> {
    let lookup = |name: &str| {
        args.get(name).ok_or_else(|| render_error(format!("template parameter {name} is not defined")))
    };
    let mut out = String::with_capacity(template.len());
    // Open conditionals, (parent emits, condition, in else branch)
    let mut stack: Vec<(bool, bool, bool)> = Vec::new();
    let mut emitting = true;
    let mut rest = template;
    while let Some(begin) = next_tag(rest) {
        let (text, tail) = rest.split_at(begin);
        if emitting {
            out.push_str(text);
        }
        let expression = tail.starts_with("{{");
        let close = if expression { "}}" } else { "%}" };
        let Some(end) = tail.find(close) else {
            return Err(render_error(format!("unterminated tag {}", &tail[..tail.len().min(16)])));
        };
        let inner = tail[2..end].trim();
        rest = &tail[end + 2..];
        if expression {
            let value = lookup(inner)?;
            if emitting {
                let _ = write!(out, "{value}");
            }
            continue;
        }
        let mut words = inner.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("if"), Some(name), None) => {
                let condition = lookup(name)?.is_truthy();
                stack.push((emitting, condition, false));
                emitting = emitting && condition;
            }
            (Some("else"), None, None) => {
                let Some((parent, condition, in_else)) = stack.last_mut() else {
                    return Err(render_error("else without if".into()));
                };
                if *in_else {
                    return Err(render_error("duplicate else".into()));
                }
                *in_else = true;
                emitting = *parent && !*condition;
            }
            (Some("endif"), None, None) => match stack.pop() {
                Some((parent, _, _)) => emitting = parent,
                None => return Err(render_error("endif without if".into())),
            },
            _ => return Err(render_error(format!("unknown statement {{% {inner} %}}"))),
        }
    }
    if !stack.is_empty() {
        return Err(render_error("if without endif".into()));
    }
    out.push_str(rest);
    Ok(out)
}

/// Kernel source templates used by a handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    /// One work item per element of C
    pub basic: String,
    /// Register blocked kernel over packed A
    pub tiled: String,
}

impl Default for Templates {
    fn default() -> Self {
        Templates {
            basic: include_str!("kernels/basic.cl").into(),
            tiled: include_str!("kernels/tiled.cl").into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{render, TemplateArgs, Templates};

    #[test]
    fn substitution() {
        let args = TemplateArgs::new().with("x", 3i64).with("y", 0.25).with("z", true);
        assert_eq!(render("a{{ x }}b{{y}}c{{ z }}", &args).unwrap(), "a3b0.25c1");
        assert_eq!(render("int v[2] = {1, 2};", &args).unwrap(), "int v[2] = {1, 2};");
    }

    #[test]
    fn conditionals() {
        let args = TemplateArgs::new().with("on", 1i64).with("off", 0i64);
        let t = "{% if on %}A{% if off %}B{% else %}C{% endif %}{% else %}D{% endif %}E";
        assert_eq!(render(t, &args).unwrap(), "ACE");
        let t = "{% if off %}{{ on }}{% else %}{{ off }}{% endif %}";
        assert_eq!(render(t, &args).unwrap(), "0");
    }

    #[test]
    fn malformed() {
        let args = TemplateArgs::new().with("x", 1i64);
        for t in ["{{ y }}", "{{ x", "{% if x %}", "{% endif %}", "{% else %}", "{% for x %}"] {
            let err = render(t, &args).unwrap_err();
            assert_eq!(err.code, -11, "{t}");
        }
        assert!(render("{% if x %}{% else %}{% else %}{% endif %}", &args).is_err());
    }

    #[test]
    fn canonical_is_sorted() {
        let a = TemplateArgs::new().with("m_mod_16", 3usize).with("beta", 0.0).with("k_mod_4", 1usize);
        let b = TemplateArgs::new().with("k_mod_4", 1usize).with("m_mod_16", 3usize).with("beta", 0.0);
        assert_eq!(a, b);
        assert_eq!(a.canonical(), "beta=0.0;k_mod_4=1;m_mod_16=3;");
    }

    #[test]
    fn builtin_templates_render() {
        let templates = Templates::default();
        let args = TemplateArgs::new()
            .with("beta", 0.0)
            .with("k_mod_4", 1usize)
            .with("m_mod_16", 0usize)
            .with("subgroups", true);
        let src = render(&templates.tiled, &args).unwrap();
        assert!(src.contains("intel_reqd_sub_group_size(8)"));
        assert!(src.contains("__kernel void mm("));
        assert!(src.contains("kk < k;"));
        assert!(src.contains("const int nr = 16;"));
        assert!(!src.contains("{%") && !src.contains("{{"));
        let src = render(&templates.basic, &TemplateArgs::new().with("beta", -0.5)).unwrap();
        assert!(src.contains("acc + -0.5f*c[i*ldc + j]"));
    }
}
