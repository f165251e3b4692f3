//! Parsed path input
//!
//! These types are what the request grammar hands to the resolver. They are
//! unresolved: names are plain strings and links are column-name lists.
//! All of them deserialize from JSON so that tools can feed the resolver
//! without a URL parser.

use std::fmt;

use serde::Deserialize;

/// Qualified name of one to three parts, e.g. `["S", "T", "col"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct Name(pub Vec<String>);

impl Name {
    /// Build from parts
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Name(parts.into_iter().map(Into::into).collect())
    }

    /// Single-part name
    pub fn simple(part: impl Into<String>) -> Self {
        Name(vec![part.into()])
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(":"))
    }
}

impl From<&str> for Name {
    /// Split on `:` as the URL grammar does
    fn from(s: &str) -> Self {
        Name(s.split(':').map(str::to_string).collect())
    }
}

/// Outer join kind for a path element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OuterJoin {
    Left,
    Right,
    Full,
}

impl OuterJoin {
    /// SQL join keyword
    pub fn sql(&self) -> &'static str {
        match self {
            OuterJoin::Left => "LEFT OUTER JOIN",
            OuterJoin::Right => "RIGHT OUTER JOIN",
            OuterJoin::Full => "FULL OUTER JOIN",
        }
    }
}

/// One table instance in the path
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct ElementInput {
    /// Table or `schema:table` for implicit links
    pub table: Option<Name>,
    /// Column list for `(cols)` links, or left side of `(l)=(r)`
    pub left: Option<Vec<Name>>,
    /// Right side of an explicit `(l)=(r)` link
    pub right: Option<Vec<Name>>,
    pub outer: Option<OuterJoin>,
    pub alias: Option<String>,
}

impl ElementInput {
    /// Element naming a table, linked implicitly
    pub fn table(name: impl Into<Name>) -> Self {
        ElementInput {
            table: Some(name.into()),
            ..Default::default()
        }
    }

    /// Element linked through a column list
    pub fn columns<I, N>(cols: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        ElementInput {
            left: Some(cols.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Element linked through explicit column equality
    pub fn explicit<L, R, N, M>(left: L, right: R) -> Self
    where
        L: IntoIterator<Item = N>,
        R: IntoIterator<Item = M>,
        N: Into<Name>,
        M: Into<Name>,
    {
        ElementInput {
            left: Some(left.into_iter().map(Into::into).collect()),
            right: Some(right.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Builder: bind an alias
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Builder: set outer join kind
    #[must_use]
    pub fn outer(mut self, kind: OuterJoin) -> Self {
        self.outer = Some(kind);
        self
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Operator {
    Eq,
    Lt,
    Leq,
    Gt,
    Geq,
    Regexp,
    CiRegexp,
    Ts,
    Null,
}

impl Operator {
    /// Parse the REST operator token (`=`, `geq`, `regexp`, ...)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" | "eq" => Some(Operator::Eq),
            "lt" => Some(Operator::Lt),
            "leq" => Some(Operator::Leq),
            "gt" => Some(Operator::Gt),
            "geq" => Some(Operator::Geq),
            "regexp" => Some(Operator::Regexp),
            "ciregexp" => Some(Operator::CiRegexp),
            "ts" => Some(Operator::Ts),
            "null" => Some(Operator::Null),
            _ => None,
        }
    }

    /// REST token
    pub fn to_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "lt",
            Operator::Leq => "leq",
            Operator::Gt => "gt",
            Operator::Geq => "geq",
            Operator::Regexp => "regexp",
            Operator::CiRegexp => "ciregexp",
            Operator::Ts => "ts",
            Operator::Null => "null",
        }
    }

    /// SQL operator text
    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Leq => "<=",
            Operator::Gt => ">",
            Operator::Geq => ">=",
            Operator::Regexp => "~",
            Operator::CiRegexp => "~*",
            Operator::Ts => "@@",
            Operator::Null => "IS NULL",
        }
    }

    /// Text operators compare the text rendering and accept the `*` column
    pub fn is_text_op(&self) -> bool {
        matches!(self, Operator::Regexp | Operator::CiRegexp | Operator::Ts)
    }

    /// Ordering operators
    pub fn is_ordered(&self) -> bool {
        matches!(self, Operator::Lt | Operator::Leq | Operator::Gt | Operator::Geq)
    }
}

impl TryFrom<String> for Operator {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Operator::parse(&s).ok_or_else(|| format!("unknown operator \"{}\"", s))
    }
}

/// Set quantifier for multi-valued operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantifier {
    Any,
    All,
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// No operand, for unary operators
    None,
    /// Single literal text
    Value(String),
    /// Literal set with quantifier, e.g. `col=any(1,2,3)`
    Set {
        quantifier: Quantifier,
        values: Vec<String>,
    },
}

/// Filter expression over path columns
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    Compare {
        name: Name,
        op: Operator,
        #[serde(default = "no_operand")]
        operand: Operand,
    },
    Not(Box<FilterExpr>),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

fn no_operand() -> Operand {
    Operand::None
}

impl FilterExpr {
    /// `name op value`
    pub fn compare(name: impl Into<Name>, op: Operator, value: impl Into<String>) -> Self {
        FilterExpr::Compare {
            name: name.into(),
            op,
            operand: Operand::Value(value.into()),
        }
    }

    /// `name::null::`
    pub fn is_null(name: impl Into<Name>) -> Self {
        FilterExpr::Compare {
            name: name.into(),
            op: Operator::Null,
            operand: Operand::None,
        }
    }

    /// `name op any(values)` or `name op all(values)`
    pub fn set<I, S>(name: impl Into<Name>, op: Operator, quantifier: Quantifier, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterExpr::Compare {
            name: name.into(),
            op,
            operand: Operand::Set {
                quantifier,
                values: values.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// `!expr`
    pub fn negate(self) -> Self {
        FilterExpr::Not(Box::new(self))
    }
}

/// Item of the parsed path
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathItem {
    Element(ElementInput),
    Filter(FilterExpr),
    /// Context reset to a bound alias (`$alias`)
    Context(String),
}

/// Aggregate function in a projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Min,
    Max,
    Cnt,
    CntD,
    Array,
    ArrayD,
    Avg,
    Sum,
}

impl AggFunc {
    pub fn to_str(&self) -> &'static str {
        match self {
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Cnt => "cnt",
            AggFunc::CntD => "cnt_d",
            AggFunc::Array => "array",
            AggFunc::ArrayD => "array_d",
            AggFunc::Avg => "avg",
            AggFunc::Sum => "sum",
        }
    }
}

/// Projection expression
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjExpr {
    Column(Name),
    Bin {
        column: Name,
        nbins: u32,
        min: String,
        max: String,
    },
    Aggregate {
        func: AggFunc,
        column: Name,
    },
}

/// Output column request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectionItem {
    pub expr: ProjExpr,
    #[serde(default)]
    pub alias: Option<String>,
}

impl ProjectionItem {
    /// Plain column output
    pub fn column(name: impl Into<Name>) -> Self {
        ProjectionItem {
            expr: ProjExpr::Column(name.into()),
            alias: None,
        }
    }

    /// Aggregate output
    pub fn aggregate(func: AggFunc, column: impl Into<Name>, alias: impl Into<String>) -> Self {
        ProjectionItem {
            expr: ProjExpr::Aggregate {
                func,
                column: column.into(),
            },
            alias: Some(alias.into()),
        }
    }

    /// Binning output
    pub fn bin(
        column: impl Into<Name>,
        nbins: u32,
        min: impl Into<String>,
        max: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        ProjectionItem {
            expr: ProjExpr::Bin {
                column: column.into(),
                nbins,
                min: min.into(),
                max: max.into(),
            },
            alias: Some(alias.into()),
        }
    }

    /// Builder: set output alias
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// Sort key on an output column
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            descending: true,
        }
    }
}

/// Page boundary direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageDirection {
    Before,
    After,
}

/// Keyset page boundary; `None` values stand for NULL
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PageBound {
    pub direction: PageDirection,
    pub values: Vec<Option<String>>,
}

impl PageBound {
    pub fn after<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        PageBound {
            direction: PageDirection::After,
            values: values.into_iter().collect(),
        }
    }

    pub fn before<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        PageBound {
            direction: PageDirection::Before,
            values: values.into_iter().collect(),
        }
    }
}
