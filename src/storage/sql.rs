//! 参数化 SQL 构造器
//!
//! 语句文本只包含固定片段和 `$n` 占位符，所有外部输入都作为参数传递。

use sea_orm::{DbBackend, Statement, Value};

#[derive(Debug, Default, Clone)]
pub struct SqlBuilder {
    sql: String,
    values: Vec<Value>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加固定文本
    pub fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    /// 追加一个参数占位符
    pub fn push_bind<V: Into<Value>>(&mut self, value: V) -> &mut Self {
        self.values.push(value.into());
        self.sql.push('$');
        self.sql.push_str(&self.values.len().to_string());
        self
    }

    /// 追加 `$a, $b, …`
    pub fn push_bind_list<V, I>(&mut self, values: I) -> &mut Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        for (index, value) in values.into_iter().enumerate() {
            if index > 0 {
                self.push(", ");
            }
            self.push_bind(value);
        }
        self
    }

    /// 用分隔符连接多段片段，每段由回调写入
    pub fn push_separated<T>(
        &mut self,
        items: impl IntoIterator<Item = T>,
        separator: &str,
        mut render: impl FnMut(&mut Self, T),
    ) -> &mut Self {
        for (index, item) in items.into_iter().enumerate() {
            if index > 0 {
                self.push(separator);
            }
            render(self, item);
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn build(self) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, self.sql, self.values)
    }
}
