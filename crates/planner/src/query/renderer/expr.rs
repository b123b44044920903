use crate::query::{
    ast::expr::{BinaryOp, BinaryOperator, Expr, FunctionCall, Ident},
    renderer::{Render, Renderer},
};

impl Render for Expr {
    fn render(&self, r: &mut Renderer) {
        match self {
            Expr::Identifier(ident) => ident.render(r),
            Expr::Value(val) => r.add_param(val.clone()),
            Expr::BinaryOp(op) => op.render(r),
            Expr::FunctionCall(func) => func.render(r),
            Expr::Alias { expr, alias } => {
                expr.render(r);
                r.sql.push_str(" AS ");
                r.push_ident(alias);
            }
            Expr::Cast { expr, data_type } => {
                r.sql.push_str("CAST(");
                expr.render(r);
                r.sql.push_str(" AS ");
                r.sql.push_str(data_type);
                r.sql.push(')');
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                // `IN ()` is a syntax error; an empty list matches nothing.
                if list.is_empty() {
                    r.sql.push_str(if *negated { "(1 = 1)" } else { "(1 = 0)" });
                    return;
                }
                r.sql.push('(');
                expr.render(r);
                r.sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
                r.push_list(list);
                r.sql.push_str("))");
            }
            Expr::IsNull { expr, negated } => {
                r.sql.push('(');
                expr.render(r);
                r.sql
                    .push_str(if *negated { " IS NOT NULL)" } else { " IS NULL)" });
            }
            Expr::Subquery(select) => {
                r.sql.push('(');
                select.render(r);
                r.sql.push(')');
            }
        }
    }
}

impl Render for Ident {
    fn render(&self, r: &mut Renderer) {
        if let Some(qualifier) = &self.qualifier {
            r.push_ident(qualifier);
            r.sql.push('.');
        }
        r.push_ident(&self.name);
    }
}

impl Render for BinaryOp {
    fn render(&self, r: &mut Renderer) {
        r.sql.push('(');
        self.left.render(r);

        let op_str = match self.op {
            BinaryOperator::Eq => " = ",
            BinaryOperator::NotEq => " <> ",
            BinaryOperator::Lt => " < ",
            BinaryOperator::LtEq => " <= ",
            BinaryOperator::Gt => " > ",
            BinaryOperator::GtEq => " >= ",
            BinaryOperator::Like => " LIKE ",
            BinaryOperator::NotLike => " NOT LIKE ",
            BinaryOperator::BitAnd => " & ",
            BinaryOperator::And => " AND ",
            BinaryOperator::Or => " OR ",
        };
        r.sql.push_str(op_str);

        self.right.render(r);
        r.sql.push(')');
    }
}

impl Render for FunctionCall {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str(&self.name);
        r.sql.push('(');
        if self.wildcard {
            r.sql.push('*');
        } else {
            r.push_list(&self.args);
        }
        r.sql.push(')');
    }
}
