//! Field queries. Several fields may share a key; singular lookups take the
//! first match in field order.

use crate::project::{Event, Field, FieldKind};

/// Fields of `event` keyed `key`, optionally restricted to one kind.
pub fn fields_by_key<'a>(
    event: &'a Event,
    key: &'a str,
    kind: Option<FieldKind>,
) -> impl Iterator<Item = &'a Field> + 'a {
    event
        .fields
        .iter()
        .filter(move |field| field.key == key && kind.map_or(true, |kind| field.kind == kind))
}

pub fn first_field<'a>(event: &'a Event, key: &str, kind: Option<FieldKind>) -> Option<&'a Field> {
    event
        .fields
        .iter()
        .find(|field| field.key == key && kind.map_or(true, |kind| field.kind == kind))
}

pub fn is_tagged(event: &Event, key: &str) -> bool {
    first_field(event, key, Some(FieldKind::Tag)).is_some()
}

/// Drops every field matching `key` (and `kind`, when given) and appends
/// `replacements` in their place at the end of the list.
pub fn replace_fields(
    event: &mut Event,
    key: &str,
    kind: Option<FieldKind>,
    replacements: Vec<Field>,
) -> usize {
    let before = event.fields.len();
    event
        .fields
        .retain(|field| !(field.key == key && kind.map_or(true, |kind| field.kind == kind)));
    let removed = before - event.fields.len();
    event.fields.extend(replacements);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Event;

    fn sample() -> Event {
        Event::new(1, [0, 0])
            .with_field(Field::dialogue("say", "first"))
            .with_field(Field::text("say", "not dialogue"))
            .with_field(Field::dialogue("say", "second"))
            .with_field(Field::text("solid", "looks like a tag"))
    }

    #[test]
    fn fields_by_key_preserves_order_and_filters_kind() {
        let event = sample();
        let all: Vec<_> = fields_by_key(&event, "say", None)
            .filter_map(Field::as_str)
            .collect();
        assert_eq!(all, vec!["first", "not dialogue", "second"]);

        let dialogue: Vec<_> = fields_by_key(&event, "say", Some(FieldKind::Dialogue))
            .filter_map(Field::as_str)
            .collect();
        assert_eq!(dialogue, vec!["first", "second"]);
    }

    #[test]
    fn first_field_returns_earliest_match() {
        let event = sample();
        let field = first_field(&event, "say", Some(FieldKind::Text)).expect("text say");
        assert_eq!(field.as_str(), Some("not dialogue"));
        assert!(first_field(&event, "missing", None).is_none());
    }

    #[test]
    fn tags_require_tag_kind() {
        let event = sample().with_field(Field::tag("one-time"));
        assert!(is_tagged(&event, "one-time"));
        assert!(!is_tagged(&event, "solid"));
    }

    #[test]
    fn replace_fields_only_touches_matching_kind() {
        let mut event = sample();
        let removed = replace_fields(
            &mut event,
            "say",
            Some(FieldKind::Dialogue),
            vec![Field::dialogue("say", "replaced")],
        );
        assert_eq!(removed, 2);
        let remaining: Vec<_> = fields_by_key(&event, "say", None)
            .filter_map(Field::as_str)
            .collect();
        assert_eq!(remaining, vec!["not dialogue", "replaced"]);
    }
}
