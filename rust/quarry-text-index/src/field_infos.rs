use ahash::AHashMap;

use crate::document::FieldOptions;

/// Segment-level description of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    /// Dense number assigned in first-seen order.
    pub number: u32,
    pub store_term_vectors: bool,
    pub store_positions_with_vectors: bool,
    pub store_offsets_with_vectors: bool,
    pub omit_term_freq_and_positions: bool,
    /// Set once any buffered occurrence of the field carried a payload.
    pub store_payloads: bool,
}

impl FieldInfo {
    fn new(name: &str, number: u32, options: &FieldOptions) -> FieldInfo {
        FieldInfo {
            name: name.to_string(),
            number,
            store_term_vectors: options.store_term_vectors,
            store_positions_with_vectors: options.store_positions_with_vectors,
            store_offsets_with_vectors: options.store_offsets_with_vectors,
            omit_term_freq_and_positions: options.omit_term_freq_and_positions,
            store_payloads: false,
        }
    }

    /// Widens the flags with another occurrence of the field.
    ///
    /// Vector flags are sticky once set. Omitting term frequencies is sticky as
    /// well and rules out payloads.
    fn update(&mut self, options: &FieldOptions) {
        self.store_term_vectors |= options.store_term_vectors;
        self.store_positions_with_vectors |= options.store_positions_with_vectors;
        self.store_offsets_with_vectors |= options.store_offsets_with_vectors;
        if options.omit_term_freq_and_positions {
            self.omit_term_freq_and_positions = true;
            self.store_payloads = false;
        }
    }
}

/// The set of fields seen by a document writer.
#[derive(Debug, Clone, Default)]
pub struct FieldInfos {
    infos: Vec<FieldInfo>,
    by_name: AHashMap<String, u32>,
}

impl FieldInfos {
    pub fn new() -> FieldInfos {
        FieldInfos::default()
    }

    /// Registers an occurrence of field `name`, assigning a number on first sight
    /// and merging the flags otherwise.
    pub fn add(&mut self, name: &str, options: &FieldOptions) -> &FieldInfo {
        let number = match self.by_name.get(name) {
            Some(&number) => {
                self.infos[number as usize].update(options);
                number
            }
            None => {
                let number = self.infos.len() as u32;
                self.infos.push(FieldInfo::new(name, number, options));
                self.by_name.insert(name.to_string(), number);
                number
            }
        };
        &self.infos[number as usize]
    }

    pub fn set_store_payloads(&mut self, name: &str) {
        if let Some(&number) = self.by_name.get(name) {
            let info = &mut self.infos[number as usize];
            if !info.omit_term_freq_and_positions {
                info.store_payloads = true;
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldInfo> {
        self.by_name
            .get(name)
            .map(|&number| &self.infos[number as usize])
    }

    pub fn by_number(&self, number: u32) -> Option<&FieldInfo> {
        self.infos.get(number as usize)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.infos.iter()
    }

    pub fn has_vectors(&self) -> bool {
        self.infos.iter().any(|info| info.store_term_vectors)
    }

    pub fn has_prox(&self) -> bool {
        self.infos
            .iter()
            .any(|info| !info.omit_term_freq_and_positions)
    }
}
