use crate::analysis::{PreTokenized, TokenStream, WordTokenStream};

/// Per-field indexing options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldOptions {
    pub store_term_vectors: bool,
    pub store_positions_with_vectors: bool,
    pub store_offsets_with_vectors: bool,
    /// Index only document ids: no term frequencies, positions or payloads.
    pub omit_term_freq_and_positions: bool,
}

impl FieldOptions {
    pub fn indexed() -> FieldOptions {
        FieldOptions::default()
    }

    /// Term vectors with positions and offsets.
    pub fn with_vectors() -> FieldOptions {
        FieldOptions {
            store_term_vectors: true,
            store_positions_with_vectors: true,
            store_offsets_with_vectors: true,
            omit_term_freq_and_positions: false,
        }
    }

    pub fn docs_only() -> FieldOptions {
        FieldOptions {
            omit_term_freq_and_positions: true,
            ..FieldOptions::default()
        }
    }
}

/// A named field of a document together with its token stream.
///
/// A document may contain several fields with the same name; they are indexed as
/// one multi-valued field.
pub struct Field {
    pub name: String,
    pub options: FieldOptions,
    pub tokens: Box<dyn TokenStream>,
}

impl Field {
    pub fn new(
        name: impl Into<String>,
        options: FieldOptions,
        tokens: impl TokenStream + 'static,
    ) -> Field {
        Field {
            name: name.into(),
            options,
            tokens: Box::new(tokens),
        }
    }

    /// A field whose value is split into words.
    pub fn text(name: impl Into<String>, value: impl Into<String>, options: FieldOptions) -> Field {
        Field::new(name, options, WordTokenStream::new(value))
    }

    /// A field made of the given terms, one position apart.
    pub fn terms<S: AsRef<str>>(
        name: impl Into<String>,
        terms: &[S],
        options: FieldOptions,
    ) -> Field {
        Field::new(name, options, PreTokenized::from_terms(terms))
    }
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct Document {
    pub fields: Vec<Field>,
}

impl Document {
    pub fn new() -> Document {
        Document::default()
    }

    pub fn with_field(mut self, field: Field) -> Document {
        self.fields.push(field);
        self
    }

    pub fn add(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
