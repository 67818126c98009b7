use sea_orm::{EntityTrait, Order, QueryOrder, Select};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

const MAX_PAGE_NUMBER: u64 = 10_000;
const MAX_PAGE_SIZE: u64 = 1_000;

fn first_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    10
}

/// Paging and sorting fields shared by every list request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedInput {
    #[serde(default = "first_page")]
    pub page_number: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// `field [asc|desc]`, comma separated. Field names are case-insensitive.
    #[serde(default)]
    pub sorting: Option<String>,
}

impl Default for PagedInput {
    fn default() -> Self {
        Self {
            page_number: first_page(),
            page_size: default_page_size(),
            sorting: None,
        }
    }
}

impl PagedInput {
    pub fn validate(&self) -> ServiceResult<()> {
        if !(1..=MAX_PAGE_NUMBER).contains(&self.page_number) {
            return Err(ServiceError::Validation(format!(
                "pageNumber must be between 1 and {MAX_PAGE_NUMBER}"
            )));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(ServiceError::Validation(format!(
                "pageSize must be at most {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        self.page_number.saturating_sub(1) * self.page_size
    }

    pub fn sort_keys(&self) -> Vec<SortKey> {
        parse_sorting(self.sorting.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T> {
    pub total_count: u64,
    pub items: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

pub fn parse_sorting(raw: &str) -> Vec<SortKey> {
    raw.split(',')
        .filter_map(|clause| {
            let mut parts = clause.split_whitespace();
            let field = parts.next()?;
            let descending = parts.next().is_some_and(|d| d.eq_ignore_ascii_case("desc"));
            Some(SortKey {
                field: field.to_string(),
                descending,
            })
        })
        .collect()
}

/// Lower-cased with separators removed, so `createdDate`, `CreatedDate` and
/// `created_date` compare equal.
pub fn normalize_field(field: &str) -> String {
    field
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Applies caller sort keys, or `fallback` when none were given.
pub fn apply_sorting<E, F>(
    mut select: Select<E>,
    keys: &[SortKey],
    resolve: F,
    fallback: &[(E::Column, Order)],
) -> ServiceResult<Select<E>>
where
    E: EntityTrait,
    F: Fn(&str) -> Option<E::Column>,
{
    if keys.is_empty() {
        for (col, order) in fallback {
            select = select.order_by(*col, order.clone());
        }
        return Ok(select);
    }

    for key in keys {
        let col = resolve(&normalize_field(&key.field))
            .ok_or_else(|| ServiceError::Validation(format!("cannot sort by '{}'", key.field)))?;
        let order = if key.descending { Order::Desc } else { Order::Asc };
        select = select.order_by(col, order);
    }
    Ok(select)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorting_clauses_parse_direction() {
        assert_eq!(
            parse_sorting("name desc, code ,createdDate ASC,,"),
            vec![
                SortKey { field: "name".into(), descending: true },
                SortKey { field: "code".into(), descending: false },
                SortKey { field: "createdDate".into(), descending: false },
            ]
        );
        assert!(parse_sorting("").is_empty());
        assert!(parse_sorting(" , ").is_empty());
    }

    #[test]
    fn field_names_normalize() {
        assert_eq!(normalize_field("createdDate"), "createddate");
        assert_eq!(normalize_field("created_date"), "createddate");
        assert_eq!(normalize_field("ReceiverName"), "receivername");
    }

    #[test]
    fn page_bounds_are_enforced() {
        let mut p = PagedInput::default();
        assert!(p.validate().is_ok());
        assert_eq!(p.offset(), 0);

        p.page_number = 3;
        p.page_size = 25;
        assert_eq!(p.offset(), 50);

        p.page_number = 0;
        assert!(p.validate().is_err());
        p.page_number = 1;
        p.page_size = MAX_PAGE_SIZE + 1;
        assert!(p.validate().is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let p: PagedInput = serde_json::from_str("{}").unwrap();
        assert_eq!(p.page_number, 1);
        assert_eq!(p.page_size, 10);
        assert!(p.sort_keys().is_empty());
    }
}
