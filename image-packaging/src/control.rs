// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian control file primitives.

Control files consist of *paragraphs* separated by blank lines. Each
paragraph is an ordered series of `Name: value` fields where continuation
lines begin with whitespace. See
<https://www.debian.org/doc/debian-policy/ch-controlfields.html> for the
canonical definition of the syntax.
*/

use {
    crate::{
        dependency::DependencyList,
        error::{ImagingError, Result},
    },
    futures::{AsyncBufRead, AsyncBufReadExt},
    std::{
        borrow::Cow,
        io::{BufRead, Write},
    },
};

/// A field in a control file.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ControlField<'a> {
    name: Cow<'a, str>,
    value: Cow<'a, str>,
}

impl<'a> ControlField<'a> {
    /// Construct an instance from a field name and value.
    pub fn new(name: Cow<'a, str>, value: Cow<'a, str>) -> Self {
        Self { name, value }
    }

    /// The name of this field.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// The value as a [&str], original formatting (including newlines and
    /// leading whitespace on continuation lines) preserved.
    pub fn value_str(&self) -> &str {
        self.value.as_ref()
    }

    /// Iterate over whitespace-delimited words in the value.
    pub fn iter_words(&self) -> impl Iterator<Item = &str> + '_ {
        self.value.as_ref().split_ascii_whitespace()
    }

    /// Iterate over lines in the value, leading whitespace stripped.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> + '_ {
        self.value.lines().map(|x| x.trim_start())
    }

    /// Write the contents of this field to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(b": ")?;
        writer.write_all(self.value.as_ref().as_bytes())?;
        writer.write_all(b"\n")
    }
}

/// A paragraph in a control file.
///
/// Field names are case insensitive on read and case preserving on set. A
/// paragraph can only contain a single occurrence of a field; this is
/// enforced through the mutation APIs.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ControlParagraph<'a> {
    fields: Vec<ControlField<'a>>,
}

impl<'a> ControlParagraph<'a> {
    /// Whether the paragraph has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set the value of a field via a [ControlField].
    ///
    /// An existing field with the same name (case insensitive) is replaced.
    pub fn set_field(&mut self, field: ControlField<'a>) {
        self.fields
            .retain(|cf| !cf.name.eq_ignore_ascii_case(&field.name));
        self.fields.push(field);
    }

    /// Set the value of a field defined via strings.
    pub fn set_field_from_string(&mut self, name: Cow<'a, str>, value: Cow<'a, str>) {
        self.set_field(ControlField::new(name, value));
    }

    /// Whether a named field is present in this paragraph.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterate over fields in insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField<'a>> {
        self.fields.iter()
    }

    /// Obtain the field with a given name in this paragraph.
    pub fn field(&self, name: &str) -> Option<&'_ ControlField<'a>> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Obtain the raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// Obtain the raw string value of a field that must be present.
    pub fn required_field_str(&self, name: &str) -> Result<&str> {
        self.field_str(name)
            .ok_or_else(|| ImagingError::ControlRequiredFieldMissing(name.to_string()))
    }

    /// Obtain the value of a field, evaluated as a boolean.
    ///
    /// The field is [true] iff its string value is `yes`.
    pub fn field_bool(&self, name: &str) -> Option<bool> {
        self.field_str(name).map(|v| matches!(v, "yes"))
    }

    /// Obtain the value of a field, parsed as a [u64].
    pub fn field_u64(&self, name: &str) -> Option<Result<u64>> {
        self.field_str(name)
            .map(|v| v.parse::<u64>().map_err(ImagingError::ParseInt))
    }

    /// Obtain the value of a field, parsed as a [DependencyList].
    pub fn field_dependency_list(&self, name: &str) -> Option<Result<DependencyList>> {
        self.field_str(name).map(DependencyList::parse)
    }

    /// Iterate over whitespace-delimited words in the named field.
    pub fn field_iter_words(&self, name: &str) -> Option<impl Iterator<Item = &str> + '_> {
        self.field(name).map(|f| f.iter_words())
    }

    /// Iterate over lines in the named field, leading whitespace stripped.
    pub fn field_iter_lines(&self, name: &str) -> Option<impl Iterator<Item = &str> + '_> {
        self.field(name).map(|f| f.iter_lines())
    }

    /// Serialize the paragraph to a writer.
    ///
    /// A trailing newline is written as part of the final field, but no
    /// paragraph-terminating blank line is emitted.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for field in &self.fields {
            field.write(writer)?;
        }

        Ok(())
    }
}

/// Holds parsing state for Debian control files.
///
/// Instances are fed lines of text and periodically emit [ControlParagraph]
/// instances as they are completed.
#[derive(Clone, Debug, Default)]
pub struct ControlFileParser {
    paragraph: ControlParagraph<'static>,
    field: Option<String>,
}

impl ControlFileParser {
    /// Write a line to the parser.
    ///
    /// If the line terminates an in-progress paragraph, that paragraph is
    /// returned. `Err` is returned if the control file is invalid.
    pub fn write_line(&mut self, line: &str) -> Result<Option<ControlParagraph<'static>>> {
        let is_empty_line = line.trim().is_empty();
        let is_indented = (line.starts_with(' ') || line.starts_with('\t')) && line.len() > 1;

        let current_field = self.field.take();

        // Empty lines terminate a paragraph. Flush any pending state.
        if is_empty_line {
            if let Some(field) = current_field {
                self.flush_field(field)?;
            }

            return Ok(if self.paragraph.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.paragraph))
            });
        }

        match (current_field, is_indented) {
            // A field is on the stack and an unindented line arrived. This
            // starts a new field; flush the previous one.
            (Some(v), false) => {
                self.flush_field(v)?;
                self.field = Some(line.to_string());

                Ok(None)
            }
            // First line of a new field.
            (None, _) => {
                self.field = Some(line.to_string());

                Ok(None)
            }
            // Continuation line. Append to the field being accumulated.
            (Some(v), true) => {
                self.field = Some(v + line);

                Ok(None)
            }
        }
    }

    /// Finish parsing, consuming self.
    pub fn finish(mut self) -> Result<Option<ControlParagraph<'static>>> {
        if let Some(field) = self.field.take() {
            self.flush_field(field)?;
        }

        Ok(if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        })
    }

    fn flush_field(&mut self, v: String) -> Result<()> {
        let (name, value) = v.split_once(':').ok_or_else(|| {
            ImagingError::ControlParse(format!("error parsing line '{}'; missing colon", v))
        })?;

        self.paragraph
            .set_field_from_string(Cow::Owned(name.to_string()), Cow::Owned(value.trim().to_string()));

        Ok(())
    }
}

/// A streaming reader of [ControlParagraph] from a [BufRead].
///
/// Instances can be consumed as an iterator; each call attempts to read a
/// full paragraph from the underlying reader.
pub struct ControlParagraphReader<R: BufRead> {
    reader: R,
    parser: Option<ControlFileParser>,
}

impl<R: BufRead> ControlParagraphReader<R> {
    /// Create a new instance bound to a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ControlFileParser::default()),
        }
    }

    /// Consumes the instance, returning the original reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn get_next(&mut self) -> Result<Option<ControlParagraph<'static>>> {
        let mut parser = self.parser.take().expect("parser present when iterating");

        loop {
            let mut line = String::new();

            if self.reader.read_line(&mut line)? != 0 {
                if let Some(paragraph) = parser.write_line(&line)? {
                    self.parser.replace(parser);
                    return Ok(Some(paragraph));
                }
            } else {
                return parser.finish();
            }
        }
    }
}

impl<R: BufRead> Iterator for ControlParagraphReader<R> {
    type Item = Result<ControlParagraph<'static>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.parser.is_none() {
            None
        } else {
            match self.get_next() {
                Ok(Some(para)) => Some(Ok(para)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        }
    }
}

/// An asynchronous reader of [ControlParagraph].
pub struct ControlParagraphAsyncReader<R> {
    reader: R,
    parser: Option<ControlFileParser>,
}

impl<R> ControlParagraphAsyncReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Create a new instance bound to a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ControlFileParser::default()),
        }
    }

    /// Consumes self, returning the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read the next available paragraph from this reader.
    ///
    /// Resolves to [None] on end of input.
    pub async fn read_paragraph(&mut self) -> Result<Option<ControlParagraph<'static>>> {
        let mut parser = if let Some(parser) = self.parser.take() {
            parser
        } else {
            return Ok(None);
        };

        loop {
            let mut line = String::new();

            if self.reader.read_line(&mut line).await? != 0 {
                if let Some(paragraph) = parser.write_line(&line)? {
                    self.parser.replace(parser);
                    return Ok(Some(paragraph));
                }
            } else {
                return parser.finish();
            }
        }
    }
}

/// A Debian control file: an ordered series of paragraphs.
#[derive(Clone, Debug, Default)]
pub struct ControlFile<'a> {
    paragraphs: Vec<ControlParagraph<'a>>,
}

impl<'a> ControlFile<'a> {
    /// Construct a new instance by parsing data from a reader.
    pub fn parse_reader<R: BufRead>(reader: &mut R) -> Result<Self> {
        let mut paragraphs = Vec::new();
        let mut parser = ControlFileParser::default();

        loop {
            let mut line = String::new();

            if reader.read_line(&mut line)? == 0 {
                break;
            }

            if let Some(paragraph) = parser.write_line(&line)? {
                paragraphs.push(paragraph);
            }
        }

        if let Some(paragraph) = parser.finish()? {
            paragraphs.push(paragraph);
        }

        Ok(Self { paragraphs })
    }

    /// Parse a control file from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        let mut reader = std::io::BufReader::new(s.as_bytes());
        Self::parse_reader(&mut reader)
    }

    /// Add a paragraph to this control file.
    pub fn add_paragraph(&mut self, p: ControlParagraph<'a>) {
        self.paragraphs.push(p);
    }

    /// Obtain paragraphs in this control file.
    pub fn paragraphs(&self) -> impl Iterator<Item = &ControlParagraph<'a>> {
        self.paragraphs.iter()
    }

    /// Obtain paragraphs in this control file, consuming self.
    pub fn into_paragraphs(self) -> impl Iterator<Item = ControlParagraph<'a>> {
        self.paragraphs.into_iter()
    }

    /// Serialize the control file to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for p in &self.paragraphs {
            p.write(writer)?;
            writer.write_all(b"\n")?;
        }

        Ok(())
    }
}
