//! Summary full-text index using Tantivy (BM25)
//!
//! AI-generated BLUF summaries are indexed per file and version so users
//! can search across their library. Vectors stay in Qdrant; this index
//! only handles keyword search.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::{Field, IndexRecordOption, OwnedValue, Schema, STORED, STRING, TEXT},
    Index, IndexReader, IndexWriter, TantivyDocument, Term,
};
use uuid::Uuid;

use crate::SearchError;

/// Summary index configuration
#[derive(Debug, Clone)]
pub struct SummaryIndexConfig {
    /// Index directory (in RAM if None)
    pub index_path: Option<String>,
    pub top_k: usize,
}

impl Default for SummaryIndexConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            top_k: 20,
        }
    }
}

/// One summary to index
#[derive(Debug, Clone)]
pub struct SummaryDocument {
    pub file_id: i64,
    pub user_id: i64,
    pub title: String,
    /// Flattened searchable text (BLUF, key points, action items)
    pub content: String,
    pub version: i64,
}

/// One search hit
#[derive(Debug, Clone)]
pub struct SummaryHit {
    pub document_id: String,
    pub file_id: i64,
    pub title: String,
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

/// Tantivy-backed summary index
pub struct SummaryIndex {
    index: Index,
    reader: IndexReader,
    writer: RwLock<IndexWriter>,
    id_field: Field,
    file_id_field: Field,
    user_id_field: Field,
    title_field: Field,
    content_field: Field,
    version_field: Field,
    config: SummaryIndexConfig,
}

impl SummaryIndex {
    pub fn new(config: SummaryIndexConfig) -> Result<Self, SearchError> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        // ids are indexed as strings so they can appear in boolean filters
        let file_id_field = schema_builder.add_text_field("file_id", STRING | STORED);
        let user_id_field = schema_builder.add_text_field("user_id", STRING | STORED);
        let title_field = schema_builder.add_text_field("title", TEXT | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT | STORED);
        let version_field = schema_builder.add_text_field("version", STRING | STORED);
        let schema = schema_builder.build();

        let index = if let Some(ref path) = config.index_path {
            std::fs::create_dir_all(path).map_err(|e| SearchError::Index(e.to_string()))?;
            let dir = tantivy::directory::MmapDirectory::open(Path::new(path))
                .map_err(|e| SearchError::Index(e.to_string()))?;
            Index::open_or_create(dir, schema.clone())
                .map_err(|e| SearchError::Index(e.to_string()))?
        } else {
            Index::create_in_ram(schema.clone())
        };

        let reader = index
            .reader()
            .map_err(|e| SearchError::Index(e.to_string()))?;
        let writer = index
            .writer(50_000_000)
            .map_err(|e| SearchError::Index(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: RwLock::new(writer),
            id_field,
            file_id_field,
            user_id_field,
            title_field,
            content_field,
            version_field,
            config,
        })
    }

    /// Index one summary, returning its document id
    pub fn index_summary(&self, summary: &SummaryDocument) -> Result<String, SearchError> {
        let document_id = Uuid::new_v4().to_string();
        {
            let mut writer = self.writer.write();
            let mut doc = TantivyDocument::default();
            doc.add_text(self.id_field, &document_id);
            doc.add_text(self.file_id_field, summary.file_id.to_string());
            doc.add_text(self.user_id_field, summary.user_id.to_string());
            doc.add_text(self.title_field, &summary.title);
            doc.add_text(self.content_field, &summary.content);
            doc.add_text(self.version_field, summary.version.to_string());

            writer
                .add_document(doc)
                .map_err(|e| SearchError::Index(e.to_string()))?;
            writer
                .commit()
                .map_err(|e| SearchError::Index(e.to_string()))?;
        }
        self.reader
            .reload()
            .map_err(|e| SearchError::Index(e.to_string()))?;
        Ok(document_id)
    }

    /// BM25 search within one user's summaries
    pub fn search(
        &self,
        user_id: i64,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SummaryHit>, SearchError> {
        let k = top_k.unwrap_or(self.config.top_k);
        let searcher = self.reader.searcher();

        let query_parser =
            QueryParser::for_index(&self.index, vec![self.title_field, self.content_field]);
        let text_query = query_parser
            .parse_query(query)
            .map_err(|e| SearchError::Search(e.to_string()))?;

        let user_term = Term::from_field_text(self.user_id_field, &user_id.to_string());
        let scoped: BooleanQuery = BooleanQuery::new(vec![
            (Occur::Must, text_query),
            (
                Occur::Must,
                Box::new(TermQuery::new(user_term, IndexRecordOption::Basic)) as Box<dyn Query>,
            ),
        ]);

        let top_docs = searcher
            .search(&scoped, &TopDocs::with_limit(k))
            .map_err(|e| SearchError::Search(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| SearchError::Search(e.to_string()))?;

            let get_str = |field: Field| {
                doc.get_first(field)
                    .and_then(|v| match v {
                        OwnedValue::Str(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .unwrap_or("")
                    .to_string()
            };

            let mut metadata = HashMap::new();
            metadata.insert("version".to_string(), get_str(self.version_field));

            hits.push(SummaryHit {
                document_id: get_str(self.id_field),
                file_id: get_str(self.file_id_field).parse().unwrap_or(0),
                title: get_str(self.title_field),
                score,
                metadata,
            });
        }
        Ok(hits)
    }

    /// Highest indexed version for a file, 0 when none
    pub fn max_version(&self, file_id: i64, user_id: i64) -> Result<i64, SearchError> {
        let searcher = self.reader.searcher();
        let file_term = Term::from_field_text(self.file_id_field, &file_id.to_string());
        let user_term = Term::from_field_text(self.user_id_field, &user_id.to_string());
        let query = BooleanQuery::new(vec![
            (
                Occur::Must,
                Box::new(TermQuery::new(file_term, IndexRecordOption::Basic)) as Box<dyn Query>,
            ),
            (
                Occur::Must,
                Box::new(TermQuery::new(user_term, IndexRecordOption::Basic)) as Box<dyn Query>,
            ),
        ]);

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(100))
            .map_err(|e| SearchError::Search(e.to_string()))?;

        let mut max = 0;
        for (_, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| SearchError::Search(e.to_string()))?;
            if let Some(OwnedValue::Str(v)) = doc.get_first(self.version_field) {
                max = max.max(v.parse().unwrap_or(0));
            }
        }
        Ok(max)
    }

    /// Remove all summary versions for a file
    pub fn delete_for_file(&self, file_id: i64) -> Result<(), SearchError> {
        {
            let mut writer = self.writer.write();
            let term = Term::from_field_text(self.file_id_field, &file_id.to_string());
            writer.delete_term(term);
            writer
                .commit()
                .map_err(|e| SearchError::Index(e.to_string()))?;
        }
        self.reader
            .reload()
            .map_err(|e| SearchError::Index(e.to_string()))?;
        Ok(())
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(file_id: i64, user_id: i64, title: &str, content: &str) -> SummaryDocument {
        SummaryDocument {
            file_id,
            user_id,
            title: title.to_string(),
            content: content.to_string(),
            version: 1,
        }
    }

    #[test]
    fn index_and_search_scoped_by_user() {
        let index = SummaryIndex::new(SummaryIndexConfig::default()).unwrap();
        index
            .index_summary(&summary(1, 7, "Standup", "Discussed the quarterly roadmap"))
            .unwrap();
        index
            .index_summary(&summary(2, 8, "Other", "Roadmap for another user"))
            .unwrap();

        let hits = index.search(7, "roadmap", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_id, 1);
        assert_eq!(hits[0].title, "Standup");
    }

    #[test]
    fn delete_for_file_removes_all_versions() {
        let index = SummaryIndex::new(SummaryIndexConfig::default()).unwrap();
        let mut doc = summary(5, 7, "Weekly", "budget review meeting");
        index.index_summary(&doc).unwrap();
        doc.version = 2;
        index.index_summary(&doc).unwrap();
        assert_eq!(index.max_version(5, 7).unwrap(), 2);

        index.delete_for_file(5).unwrap();
        assert_eq!(index.doc_count(), 0);
        assert_eq!(index.max_version(5, 7).unwrap(), 0);
    }

    #[test]
    fn version_tracking() {
        let index = SummaryIndex::new(SummaryIndexConfig::default()).unwrap();
        assert_eq!(index.max_version(1, 1).unwrap(), 0);
        index.index_summary(&summary(1, 1, "a", "b")).unwrap();
        assert_eq!(index.max_version(1, 1).unwrap(), 1);
    }
}
